//! tee_crypto
//!
//! Command-line client for the secure-element enclave. Opens a session with
//! the crypto or storage application, issues one command and exits.
//!
//! # Commands
//!
//! - `keygen`: generate and persist a key under a numeric id
//! - `crypto`: encrypt, decrypt, sign, verify or digest with a stored key
//! - `store` / `get` / `delete`: raw secure objects

use anyhow::{bail, Context, Result};
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand, ValueEnum};
use se_enclave::client;
use se_enclave::config::{EnclaveConfig, STORAGE_DIR_ENV};
use se_enclave::enclave::Enclave;
use se_enclave::engine::IV_SIZE;
use se_enclave::flags::{Algorithm, KeyClass, Mode, OperationDescriptor};
use se_enclave::keys::{TEE_TYPE_AES, TEE_TYPE_RSA_KEYPAIR};
use se_enclave::ta::{CRYPTO_UUID, STORAGE_UUID};
use std::fs;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Output buffer offered to crypto operations
const CRYPTO_OUTPUT_BUFFER: usize = 4096;

#[derive(Debug, Parser)]
#[command(name = "tee_crypto", version, about = "Secure-element enclave client")]
struct Cli {
    /// Directory holding persisted keys and objects
    #[arg(long = "storage-dir", env = STORAGE_DIR_ENV, global = true)]
    storage_dir: Option<PathBuf>,

    /// Reject ambiguous operation bitmasks instead of picking by priority
    #[arg(long = "strict-flags", global = true)]
    strict_flags: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a key and persist it under --ID
    Keygen {
        #[arg(long = "ID")]
        id: u32,
        #[arg(long = "key_type", value_enum)]
        key_type: KeyTypeArg,
        /// Key size in bits
        #[arg(long = "key_size")]
        key_size: u32,
    },
    /// Run one operation with a stored key
    Crypto(CryptoArgs),
    /// Store a file as a secure object
    Store {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        #[arg(short = 'i', long = "id")]
        id: String,
    },
    /// Write a secure object to a file
    Get {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        #[arg(short = 'i', long = "id")]
        id: String,
    },
    /// Delete a secure object
    Delete {
        #[arg(short = 'i', long = "id")]
        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KeyTypeArg {
    #[value(name = "AES")]
    Aes,
    #[value(name = "RSA")]
    Rsa,
}

impl KeyTypeArg {
    fn object_type(self) -> u32 {
        match self {
            KeyTypeArg::Aes => TEE_TYPE_AES,
            KeyTypeArg::Rsa => TEE_TYPE_RSA_KEYPAIR,
        }
    }

    fn key_class(self) -> KeyClass {
        match self {
            KeyTypeArg::Aes => KeyClass::Symmetric,
            KeyTypeArg::Rsa => KeyClass::Asymmetric,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    #[value(name = "TEE_ALG_AES_CBC_NOPAD")]
    AesCbcNoPad,
    #[value(name = "TEE_ALG_AES_CTR")]
    AesCtr,
    #[value(name = "TEE_ALG_RSAES_PKCS1_OAEP_MGF1_SHA256")]
    RsaesOaep,
    #[value(name = "TEE_ALG_RSA_NOPAD")]
    RsaNoPad,
    #[value(name = "TEE_ALG_RSASSA_PKCS1_V1_5_SHA256")]
    RsassaPkcs1V15,
    #[value(name = "TEE_ALG_RSASSA_PKCS1_PSS_MGF1_SHA256")]
    RsassaPss,
    #[value(name = "TEE_ALG_SHA256")]
    Sha256,
    #[value(name = "TEE_ALG_SHA512")]
    Sha512,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::AesCbcNoPad => Algorithm::AesCbcNoPad,
            AlgorithmArg::AesCtr => Algorithm::AesCtr,
            AlgorithmArg::RsaesOaep => Algorithm::RsaesPkcs1OaepMgf1Sha256,
            AlgorithmArg::RsaNoPad => Algorithm::RsaNoPad,
            AlgorithmArg::RsassaPkcs1V15 => Algorithm::RsassaPkcs1V15Sha256,
            AlgorithmArg::RsassaPss => Algorithm::RsassaPkcs1PssMgf1Sha256,
            AlgorithmArg::Sha256 => Algorithm::Sha256,
            AlgorithmArg::Sha512 => Algorithm::Sha512,
        }
    }
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("operation")
        .required(true)
        .args(["encrypt", "decrypt", "sign", "verify", "digest"])
))]
#[command(group(ArgGroup::new("source").required(true).args(["input", "in_file"])))]
struct CryptoArgs {
    /// Id of the stored key; ignored for digests
    #[arg(long = "ID", default_value_t = 0)]
    id: u32,
    /// Key type; inferred from --mode when omitted
    #[arg(long = "key_type", value_enum)]
    key_type: Option<KeyTypeArg>,
    #[arg(long)]
    encrypt: bool,
    #[arg(long)]
    decrypt: bool,
    #[arg(long)]
    sign: bool,
    #[arg(long)]
    verify: bool,
    #[arg(long)]
    digest: bool,
    #[arg(long, value_enum)]
    mode: AlgorithmArg,
    /// 16-character IV for AES modes
    #[arg(long = "IV")]
    iv: Option<String>,
    /// Literal input text
    #[arg(long = "in")]
    input: Option<String>,
    #[arg(long = "in_file")]
    in_file: Option<PathBuf>,
    /// Output file; not used when verifying
    #[arg(long = "out_file", required_unless_present = "verify")]
    out_file: Option<PathBuf>,
    /// Signature to check when verifying
    #[arg(long = "signature_file")]
    signature_file: Option<PathBuf>,
}

impl CryptoArgs {
    fn mode(&self) -> Mode {
        if self.digest {
            Mode::Digest
        } else if self.encrypt {
            Mode::Encrypt
        } else if self.sign {
            Mode::Sign
        } else if self.verify {
            Mode::Verify
        } else {
            Mode::Decrypt
        }
    }

    fn flags(&self) -> u32 {
        let algorithm = Algorithm::from(self.mode);
        let key_class = match self.mode() {
            Mode::Digest => KeyClass::None,
            _ => self
                .key_type
                .map(KeyTypeArg::key_class)
                .unwrap_or_else(|| algorithm.key_class()),
        };
        OperationDescriptor {
            mode: Some(self.mode()),
            algorithm: Some(algorithm),
            key_class,
        }
        .to_flags()
    }

    fn read_input(&self) -> Result<Vec<u8>> {
        match (&self.input, &self.in_file) {
            (Some(text), _) => Ok(text.as_bytes().to_vec()),
            (None, Some(path)) => {
                fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
            }
            (None, None) => bail!("one of --in or --in_file is required"),
        }
    }

    /// Output slot contents on entry: the IV, the signature, or nothing
    fn output_seed(&self) -> Result<Vec<u8>> {
        if self.verify {
            let path = self
                .signature_file
                .as_ref()
                .context("--verify needs --signature_file")?;
            return fs::read(path).with_context(|| format!("Failed to read {}", path.display()));
        }

        let mut buffer = vec![0u8; CRYPTO_OUTPUT_BUFFER];
        if let Some(iv) = &self.iv {
            if Algorithm::from(self.mode).key_class() != KeyClass::Symmetric {
                bail!("--IV only applies to AES modes");
            }
            if iv.len() != IV_SIZE {
                bail!("--IV must be exactly {} characters, got {}", IV_SIZE, iv.len());
            }
            buffer[..IV_SIZE].copy_from_slice(iv.as_bytes());
        }
        Ok(buffer)
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn run_crypto(enclave: &mut Enclave, args: &CryptoArgs) -> Result<()> {
    let flags = args.flags();
    let input = args.read_input()?;
    let mut output = args.output_seed()?;

    let mut session = enclave
        .open_session(&CRYPTO_UUID)
        .context("Failed to open crypto session")?;

    info!(key_id = args.id, flags, input_len = input.len(), "Running crypto operation");
    let len = match client::encrypt_decrypt(&mut session, args.id, flags, &input, &mut output) {
        Err(se_enclave::TeeError::ShortBuffer { required }) if !args.verify => {
            output.resize(required, 0);
            client::encrypt_decrypt(&mut session, args.id, flags, &input, &mut output)
        }
        other => other,
    }
    .map_err(|e| anyhow::anyhow!("EncryptDecrypt failed with {:#010x}: {}", e.code(), e))?;

    if args.verify {
        info!("Signature verified");
        return Ok(());
    }
    output.truncate(len);
    let out_file = args.out_file.as_ref().context("--out_file is required")?;
    fs::write(out_file, &output)
        .with_context(|| format!("Failed to write {}", out_file.display()))?;
    info!(out_file = %out_file.display(), output_len = len, "Output written");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = EnclaveConfig::default().with_strict_flags(cli.strict_flags);
    if let Some(dir) = &cli.storage_dir {
        config = config.with_storage_dir(dir);
    }
    let mut enclave = Enclave::new(&config).context("Failed to start enclave")?;

    let gp = |what: &'static str| {
        move |e: se_enclave::TeeError| anyhow::anyhow!("{} failed with {:#010x}: {}", what, e.code(), e)
    };

    match &cli.command {
        Command::Keygen {
            id,
            key_type,
            key_size,
        } => {
            let mut session = enclave.open_session(&CRYPTO_UUID).map_err(gp("OpenSession"))?;
            client::generate_key(&mut session, key_type.object_type(), *key_size, *id)
                .map_err(gp("GenerateKey"))?;
            info!(key_id = id, key_size, "Key generated");
        }
        Command::Crypto(args) => run_crypto(&mut enclave, args)?,
        Command::Store { file, id } => {
            let data =
                fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
            let mut session = enclave.open_session(&STORAGE_UUID).map_err(gp("OpenSession"))?;
            client::write_object(&mut session, id.as_bytes(), &data).map_err(gp("WriteRaw"))?;
            info!(id = %id, data_len = data.len(), "Object stored");
        }
        Command::Get { file, id } => {
            let mut session = enclave.open_session(&STORAGE_UUID).map_err(gp("OpenSession"))?;
            let data = client::read_object(&mut session, id.as_bytes()).map_err(gp("ReadRaw"))?;
            fs::write(file, &data).with_context(|| format!("Failed to write {}", file.display()))?;
            info!(id = %id, data_len = data.len(), "Object retrieved");
        }
        Command::Delete { id } => {
            let mut session = enclave.open_session(&STORAGE_UUID).map_err(gp("OpenSession"))?;
            client::delete_object(&mut session, id.as_bytes()).map_err(gp("Delete"))?;
            info!(id = %id, "Object deleted");
        }
    }

    Ok(())
}

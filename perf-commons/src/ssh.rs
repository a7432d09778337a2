use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use rand::rngs::OsRng;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use ssh_key::public::{KeyData, PublicKey, RsaPublicKey};

use crate::error::{Error, Result};

const KEY_BITS: usize = 2048;
pub const DEFAULT_KEY_FILE_NAME: &str = "ssh";

fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut options, mode);
    let mut file = options.open(path).map_err(|e| Error::io(path, e))?;
    // umask may have narrowed the creation mode
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(mode))
            .map_err(|e| Error::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    file.write_all(contents).map_err(|e| Error::io(path, e))
}

/// Writes a new RSA keypair and returns `(private, public)` key paths.
///
/// The private key is PKCS#1 PEM, the public key is in `authorized_keys`
/// format. Without `dir` the keys go to a fresh temporary directory named
/// after `tmp_dir_pattern`, which is left on disk for the caller.
#[tracing::instrument]
pub fn generate_ssh_key_pair(
    dir: Option<&Path>,
    tmp_dir_pattern: &str,
    file_name: &str,
) -> Result<(PathBuf, PathBuf)> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => tempfile::Builder::new()
            .prefix(tmp_dir_pattern)
            .tempdir()
            .map_err(|e| Error::Io {
                context: "Error creating temporary directory".to_string(),
                source: e,
            })?
            .keep(),
    };
    let file_name = if file_name.is_empty() {
        DEFAULT_KEY_FILE_NAME
    } else {
        file_name
    };
    let private_path = dir.join(file_name);
    let public_path = dir.join(format!("{file_name}.pub"));

    let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
        .map_err(|e| Error::Ssh(format!("failed to generate private key: {e}")))?;
    let pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| Error::Ssh(format!("failed to encode private key: {e}")))?;
    write_with_mode(&private_path, pem.as_bytes(), 0o600)?;

    let public_key = RsaPublicKey::try_from(private_key.to_public_key())
        .map_err(|e| Error::Ssh(format!("failed to generate public key: {e}")))?;
    let authorized = PublicKey::new(KeyData::Rsa(public_key), "")
        .to_openssh()
        .map_err(|e| Error::Ssh(format!("failed to generate public key: {e}")))?;
    write_with_mode(&public_path, format!("{authorized}\n").as_bytes(), 0o644)?;

    tracing::info!("SSH keys saved to [{}]", dir.display());
    Ok((private_path, public_path))
}

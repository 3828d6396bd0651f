use std::path::{Path, PathBuf};

use rand::RngCore;
use tokio::fs;

use super::{MediaError, MediaResult};

const KEY_FILE_NAME: &str = "enc.key";
const KEY_INFO_FILE_NAME: &str = "enc.keyinfo";

/// Location of the AES-128 key for `content_id`. Lives under the key store,
/// never under the public media root.
pub fn key_path(key_store: &Path, content_id: i64) -> PathBuf {
    key_store.join(content_id.to_string()).join(KEY_FILE_NAME)
}

#[derive(Debug, Clone)]
pub struct EncryptionKey {
    pub key: [u8; 16],
    pub iv: [u8; 16],
    pub key_path: PathBuf,
}

impl EncryptionKey {
    pub async fn generate(key_store: &Path, content_id: i64) -> MediaResult<Self> {
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        {
            let mut rng = rand::thread_rng();
            rng.fill_bytes(&mut key);
            rng.fill_bytes(&mut iv);
        }

        let key_path = key_path(key_store, content_id);
        if let Some(parent) = key_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| MediaError::io(parent, err))?;
        }
        fs::write(&key_path, key)
            .await
            .map_err(|err| MediaError::io(&key_path, err))?;
        restrict_permissions(&key_path).await?;
        Ok(Self { key, iv, key_path })
    }

    pub async fn load(key_store: &Path, content_id: i64) -> MediaResult<Vec<u8>> {
        let path = key_path(key_store, content_id);
        fs::read(&path).await.map_err(|err| MediaError::io(path, err))
    }

    pub async fn discard(key_store: &Path, content_id: i64) {
        let dir = key_store.join(content_id.to_string());
        let _ = fs::remove_dir_all(dir).await;
    }

    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }

    /// Writes the encoder key-info file (key URI, local key path, IV) next to
    /// the key, so it never lands in the published output.
    pub async fn write_key_info(&self, key_url: &str) -> MediaResult<PathBuf> {
        let info_path = self.key_path.with_file_name(KEY_INFO_FILE_NAME);
        let body = format!(
            "{key_url}\n{}\n{}\n",
            self.key_path.display(),
            self.iv_hex()
        );
        fs::write(&info_path, body)
            .await
            .map_err(|err| MediaError::io(&info_path, err))?;
        restrict_permissions(&info_path).await?;
        Ok(info_path)
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> MediaResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|err| MediaError::io(path, err))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> MediaResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn generates_key_and_info_file() {
        let dir = tempdir().unwrap();
        let store = dir.path().join("keys");
        let key = EncryptionKey::generate(&store, 7).await.unwrap();
        assert_eq!(key.key_path, store.join("7").join("enc.key"));
        assert_eq!(std::fs::read(&key.key_path).unwrap(), key.key.to_vec());

        let info = key
            .write_key_info("https://cinema.example.com/streaming/keys/7")
            .await
            .unwrap();
        assert_eq!(info, store.join("7").join("enc.keyinfo"));
        let body = std::fs::read_to_string(info).unwrap();
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines[0], "https://cinema.example.com/streaming/keys/7");
        assert_eq!(lines[1], key.key_path.display().to_string());
        assert_eq!(lines[2].len(), 32);

        assert_eq!(EncryptionKey::load(&store, 7).await.unwrap(), key.key.to_vec());
    }
}

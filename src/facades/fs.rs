use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::core::error::MigrateError;

const KDF_ITERATIONS: u32 = 320_000;
// Fixed salt is a known limitation of the bundle format; the nonce in the file
// header is random per bundle.
const KDF_SALT: [u8; 16] = [0u8; 16];
const KEY_LEN: usize = 32;

/// Filesystem operations used by plugins and the orchestrator.
pub trait FileSystem {
    fn dir_exists(&self, path: &Path) -> bool;
    fn file_exists(&self, path: &Path) -> bool;
    fn dir_has_contents(&self, path: &Path) -> bool;

    /// Replace `to` with a copy of `from`. A non-empty `to` requires `force`.
    fn copy_directory(&self, from: &Path, to: &Path, force: bool) -> Result<(), MigrateError>;

    /// Copy a single file into `to_dir`, keeping its filename.
    fn copy_file(&self, from: &Path, to_dir: &Path) -> Result<PathBuf, MigrateError>;

    /// Remove every entry under `dir`, creating it if absent.
    fn remove_dir_contents(&self, dir: &Path) -> Result<(), MigrateError>;

    fn read_text_file(&self, path: &Path) -> Result<String, MigrateError>;
    fn write_text_file(&self, path: &Path, contents: &str) -> Result<(), MigrateError>;

    /// Zip `from`, seal it under a key derived from `secret`, write `bundle_path`.
    fn copy_directory_to_encrypted_file(
        &self,
        from: &Path,
        bundle_path: &Path,
        secret: &str,
    ) -> Result<(), MigrateError>;

    /// Reverse of sealing; `to` follows the same force semantics as `copy_directory`.
    fn copy_directory_from_encrypted_file(
        &self,
        bundle_path: &Path,
        to: &Path,
        secret: &str,
        force: bool,
    ) -> Result<(), MigrateError>;
}

/// Production filesystem adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFileSystem;

impl DiskFileSystem {
    fn replace_dir(&self, to: &Path) -> Result<(), MigrateError> {
        if to.is_dir() {
            clear_readonly(to)?;
            fs::remove_dir_all(to)?;
        } else if to.exists() {
            fs::remove_file(to)?;
        }
        fs::create_dir_all(to)?;
        Ok(())
    }

    fn check_destination(&self, to: &Path, force: bool) -> Result<(), MigrateError> {
        // A regular file sitting at the target counts as an occupied destination.
        let occupied = self.dir_has_contents(to) || (to.exists() && !to.is_dir());
        if occupied && !force {
            return Err(MigrateError::DestinationNotEmpty(to.to_path_buf()));
        }
        Ok(())
    }
}

impl FileSystem for DiskFileSystem {
    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn dir_has_contents(&self, path: &Path) -> bool {
        fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    fn copy_directory(&self, from: &Path, to: &Path, force: bool) -> Result<(), MigrateError> {
        if !from.is_dir() {
            return Err(MigrateError::SourceMissing(from.to_path_buf()));
        }
        self.check_destination(to, force)?;
        self.replace_dir(to)?;

        for entry in WalkDir::new(from) {
            let entry = entry.map_err(|e| {
                MigrateError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk failed")
                }))
            })?;
            let rel = entry
                .path()
                .strip_prefix(from)
                .expect("walkdir yields children of the root");
            if rel.as_os_str().is_empty() {
                continue;
            }
            let target = to.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    fn copy_file(&self, from: &Path, to_dir: &Path) -> Result<PathBuf, MigrateError> {
        if !from.is_file() {
            return Err(MigrateError::SourceMissing(from.to_path_buf()));
        }
        fs::create_dir_all(to_dir)?;
        let file_name = from
            .file_name()
            .ok_or_else(|| MigrateError::SourceMissing(from.to_path_buf()))?;
        let target = to_dir.join(file_name);
        fs::copy(from, &target)?;
        Ok(target)
    }

    fn remove_dir_contents(&self, dir: &Path) -> Result<(), MigrateError> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
            return Ok(());
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            clear_readonly(&path)?;
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn read_text_file(&self, path: &Path) -> Result<String, MigrateError> {
        let raw = fs::read_to_string(path)?;
        // Tolerate a UTF-8 BOM written by Windows editors.
        Ok(raw.strip_prefix('\u{feff}').unwrap_or(&raw).to_string())
    }

    fn write_text_file(&self, path: &Path, contents: &str) -> Result<(), MigrateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn copy_directory_to_encrypted_file(
        &self,
        from: &Path,
        bundle_path: &Path,
        secret: &str,
    ) -> Result<(), MigrateError> {
        if !from.is_dir() {
            return Err(MigrateError::SourceMissing(from.to_path_buf()));
        }
        if bundle_path.exists() {
            return Err(MigrateError::BundleExists(bundle_path.to_path_buf()));
        }
        if let Some(parent) = bundle_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = staging_path(bundle_path);
        zip_directory(from, &staging)?;
        let sealed = (|| -> Result<Vec<u8>, MigrateError> {
            let mut data = fs::read(&staging)?;
            let key = bundle_key(secret)?;
            let mut nonce_bytes = [0u8; NONCE_LEN];
            SystemRandom::new()
                .fill(&mut nonce_bytes)
                .map_err(|_| MigrateError::Config("random generator failure".into()))?;
            let nonce = Nonce::assume_unique_for_key(nonce_bytes);
            key.seal_in_place_append_tag(nonce, Aad::empty(), &mut data)
                .map_err(|_| MigrateError::Config("bundle sealing failed".into()))?;

            let mut out = Vec::with_capacity(NONCE_LEN + data.len());
            out.extend_from_slice(&nonce_bytes);
            out.extend_from_slice(&data);
            Ok(out)
        })();
        // Staging holds plaintext; remove it whether or not sealing worked.
        let _ = fs::remove_file(&staging);
        fs::write(bundle_path, sealed?)?;
        log::info!(
            "sealed '{}' into '{}'",
            from.display(),
            bundle_path.display()
        );
        Ok(())
    }

    fn copy_directory_from_encrypted_file(
        &self,
        bundle_path: &Path,
        to: &Path,
        secret: &str,
        force: bool,
    ) -> Result<(), MigrateError> {
        if !bundle_path.is_file() {
            return Err(MigrateError::SourceMissing(bundle_path.to_path_buf()));
        }
        self.check_destination(to, force)?;

        let raw = fs::read(bundle_path)?;
        if raw.len() <= NONCE_LEN {
            return Err(MigrateError::BundleAuthFailed(bundle_path.to_path_buf()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let key = bundle_key(secret)?;
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| MigrateError::BundleAuthFailed(bundle_path.to_path_buf()))?;
        let mut buf = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(nonce, Aad::empty(), &mut buf)
            .map_err(|_| MigrateError::BundleAuthFailed(bundle_path.to_path_buf()))?;

        let staging = staging_path(bundle_path);
        fs::write(&staging, plaintext)?;
        let extracted = (|| -> Result<(), MigrateError> {
            self.replace_dir(to)?;
            let mut archive = ZipArchive::new(File::open(&staging)?)?;
            archive.extract(to)?;
            Ok(())
        })();
        let _ = fs::remove_file(&staging);
        extracted?;
        log::info!(
            "unsealed '{}' into '{}'",
            bundle_path.display(),
            to.display()
        );
        Ok(())
    }
}

fn staging_path(bundle_path: &Path) -> PathBuf {
    let mut name = bundle_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".staging");
    bundle_path.with_file_name(name)
}

fn bundle_key(secret: &str) -> Result<LessSafeKey, MigrateError> {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(KDF_ITERATIONS).expect("non-zero iteration count"),
        &KDF_SALT,
        secret.as_bytes(),
        &mut key,
    );
    let unbound = UnboundKey::new(&AES_256_GCM, &key)
        .map_err(|_| MigrateError::Config("key derivation failed".into()))?;
    Ok(LessSafeKey::new(unbound))
}

fn zip_directory(from: &Path, zip_path: &Path) -> Result<(), MigrateError> {
    let file = File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| {
            MigrateError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "walk failed")
            }))
        })?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .expect("walkdir yields children of the root");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut f = File::open(entry.path())?;
            let mut buf = Vec::new();
            f.read_to_end(&mut buf)?;
            zip.write_all(&buf)?;
        }
    }
    zip.finish()?;
    Ok(())
}

fn clear_readonly(path: &Path) -> Result<(), MigrateError> {
    for entry in WalkDir::new(path) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let mut perms = meta.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            let _ = fs::set_permissions(entry.path(), perms);
        }
    }
    Ok(())
}

//! [`TpmModule`] implementation that shells out to `tpm2-tools`.
//!
//! Each key is an ECC P-256 child created under a transient owner-hierarchy
//! primary, so every key gets fresh private material from the module's RNG.
//! The child is persisted at a random handle in the persistent range and the
//! primary is flushed. Signatures are returned in the tool's `plain` format,
//! untouched.
//!
//! Requirements:
//! - `tpm2_createprimary`, `tpm2_create`, `tpm2_load`, `tpm2_evictcontrol`,
//!   `tpm2_readpublic`, `tpm2_sign`, `tpm2_getcap` and `tpm2_flushcontext`
//!   available in `PATH`

use std::path::Path;
use std::process::Command;

use rand::Rng;
use rand::rngs::OsRng;
use sha2::Digest as _;
use tracing::warn;

use crate::backend::KeyPurpose;
use crate::error::KeystoreError;
use crate::hardware::{TpmCredentials, TpmKey, TpmModule, fmt_handle};

const SIGNING_KEY_ATTRIBUTES: &str = "fixedtpm|fixedparent|sensitivedataorigin|userwithauth|sign";

/// Runs one `tpm2-tools` binary and returns its stdout.
pub trait ToolRunner: Send + Sync + 'static {
    fn run(
        &self,
        credentials: &TpmCredentials,
        bin: &str,
        args: &[&str],
    ) -> Result<String, KeystoreError>;
}

/// Runs the tools found in `PATH`, with `TPM2TOOLS_TCTI` set from the
/// credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTools;

impl ToolRunner for SystemTools {
    fn run(
        &self,
        credentials: &TpmCredentials,
        bin: &str,
        args: &[&str],
    ) -> Result<String, KeystoreError> {
        let output = Command::new(bin)
            .env("TPM2TOOLS_TCTI", &credentials.tcti)
            .args(args)
            .output()
            .map_err(|e| KeystoreError::Unavailable(format!("spawn {bin}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(KeystoreError::Unavailable(format!(
                "{bin} failed status={} stderr={}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// `tpm2-tools` backed module.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tpm2ToolsModule<R = SystemTools> {
    tools: R,
}

impl Tpm2ToolsModule {
    pub const fn new() -> Self {
        Self { tools: SystemTools }
    }
}

impl<R: ToolRunner> Tpm2ToolsModule<R> {
    pub const fn with_runner(tools: R) -> Self {
        Self { tools }
    }

    fn run(
        &self,
        credentials: &TpmCredentials,
        bin: &str,
        args: &[&str],
    ) -> Result<String, KeystoreError> {
        self.tools.run(credentials, bin, args)
    }

    /// Create a child signing key under a transient primary and load it,
    /// leaving its context in `key_ctx`. The primary is flushed either way.
    fn create_loaded_key(
        &self,
        credentials: &TpmCredentials,
        dir: &Path,
        key_ctx: &str,
    ) -> Result<(), KeystoreError> {
        let primary = dir.join("primary.ctx");
        let primary = path_str(&primary)?;
        let public = dir.join("key.pub");
        let public = path_str(&public)?;
        let private = dir.join("key.priv");
        let private = path_str(&private)?;

        let owner_auth = credentials.owner_auth.as_str();
        self.run(
            credentials,
            "tpm2_createprimary",
            &["-C", "o", "-P", owner_auth, "-G", "ecc", "-c", primary],
        )?;

        let created = self
            .run(
                credentials,
                "tpm2_create",
                &[
                    "-C",
                    primary,
                    "-G",
                    "ecc",
                    "-a",
                    SIGNING_KEY_ATTRIBUTES,
                    "-u",
                    public,
                    "-r",
                    private,
                ],
            )
            .and_then(|_| {
                self.run(
                    credentials,
                    "tpm2_load",
                    &["-C", primary, "-u", public, "-r", private, "-c", key_ctx],
                )
            });

        if let Err(e) = self.run(credentials, "tpm2_flushcontext", &[primary]) {
            warn!(error = %e, "Failed to flush TPM 2.0 primary");
        }
        created.map(|_| ())
    }

    /// Remove a persisted key again after a failed creation.
    fn evict(&self, credentials: &TpmCredentials, handle: &str) {
        let owner_auth = credentials.owner_auth.as_str();
        let args = ["-C", "o", "-P", owner_auth, "-c", handle];
        if let Err(e) = self.run(credentials, "tpm2_evictcontrol", &args) {
            warn!(handle = %handle, error = %e, "Failed to evict TPM 2.0 key");
        }
    }

    fn has_handle(&self, credentials: &TpmCredentials, handle: &str) -> bool {
        self.run(credentials, "tpm2_readpublic", &["-c", handle])
            .is_ok()
    }

    /// Read the uncompressed P-256 point (`0x04 || x || y`) of a persisted
    /// key.
    fn read_public(
        &self,
        credentials: &TpmCredentials,
        handle: &str,
    ) -> Result<Vec<u8>, KeystoreError> {
        let out = self.run(credentials, "tpm2_readpublic", &["-c", handle])?;

        // Parse `x:` and `y:` lines from the tool output.
        let mut x_hex: Option<&str> = None;
        let mut y_hex: Option<&str> = None;
        for line in out.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("x:") {
                x_hex = Some(rest.trim());
            } else if let Some(rest) = line.strip_prefix("y:") {
                y_hex = Some(rest.trim());
            }
        }

        let mut point = Vec::with_capacity(65);
        point.push(0x04);
        point.extend(decode_coordinate(x_hex, "x")?);
        point.extend(decode_coordinate(y_hex, "y")?);
        Ok(point)
    }
}

impl<R: ToolRunner> TpmModule for Tpm2ToolsModule<R> {
    fn initialize(&self, credentials: &TpmCredentials) -> Result<(), KeystoreError> {
        // Creating a primary under the owner hierarchy proves both that the
        // module answers and that the owner auth value is right.
        let tmp = tempdir()?;
        let ctx = tmp.path().join("auth-check.ctx");
        let ctx = path_str(&ctx)?;
        let owner_auth = credentials.owner_auth.as_str();
        self.run(
            credentials,
            "tpm2_createprimary",
            &["-C", "o", "-P", owner_auth, "-c", ctx],
        )?;
        self.run(credentials, "tpm2_flushcontext", &[ctx])?;
        Ok(())
    }

    fn create_key(
        &self,
        credentials: &TpmCredentials,
        purpose: KeyPurpose,
    ) -> Result<TpmKey, KeystoreError> {
        let persistent_handle = 0x8100_0000 | (OsRng.r#gen::<u32>() & 0x00FF_FFFF).max(1);
        let handle = fmt_handle(persistent_handle);

        let tmp = tempdir()?;
        let key_ctx = tmp.path().join(format!("{purpose}.ctx"));
        let key_ctx = path_str(&key_ctx)?;

        self.create_loaded_key(credentials, tmp.path(), key_ctx)?;
        let owner_auth = credentials.owner_auth.as_str();
        let args = ["-C", "o", "-P", owner_auth, "-c", key_ctx, &handle];
        let persisted = self.run(credentials, "tpm2_evictcontrol", &args);
        if let Err(e) = self.run(credentials, "tpm2_flushcontext", &[key_ctx]) {
            warn!(error = %e, "Failed to flush loaded TPM 2.0 key");
        }
        persisted?;

        match self.read_public(credentials, &handle) {
            Ok(public_key) => Ok(TpmKey {
                persistent_handle,
                public_key,
            }),
            Err(e) => {
                self.evict(credentials, &handle);
                Err(e)
            }
        }
    }

    fn sign(
        &self,
        credentials: &TpmCredentials,
        persistent_handle: u32,
        payload: &[u8],
    ) -> Result<Vec<u8>, KeystoreError> {
        let handle = fmt_handle(persistent_handle);
        let digest = sha2::Sha256::digest(payload);

        let tmp = tempdir()?;
        let digest_path = tmp.path().join("digest.bin");
        let sig_path = tmp.path().join("sig.bin");
        std::fs::write(&digest_path, digest)?;

        let signed = self.run(
            credentials,
            "tpm2_sign",
            &[
                "-c",
                &handle,
                "-g",
                "sha256",
                "-d",
                "-f",
                "plain",
                "-o",
                path_str(&sig_path)?,
                path_str(&digest_path)?,
            ],
        );

        if let Err(e) = signed {
            // Only a handle the module no longer knows is a missing key.
            // Auth or transport failures stay keystore failures.
            if !self.has_handle(credentials, &handle) && self.is_reachable(credentials) {
                return Err(KeystoreError::KeyNotFound(handle));
            }
            return Err(e);
        }

        Ok(std::fs::read(&sig_path)?)
    }

    fn is_reachable(&self, credentials: &TpmCredentials) -> bool {
        self.run(credentials, "tpm2_getcap", &["properties-fixed"])
            .is_ok()
    }
}

fn decode_coordinate(part: Option<&str>, name: &str) -> Result<Vec<u8>, KeystoreError> {
    let Some(part) = part else {
        return Err(KeystoreError::Unavailable(format!("readpublic output missing {name}")));
    };
    let bytes = hex::decode(part)
        .map_err(|e| KeystoreError::Unavailable(format!("bad {name} coordinate: {e}")))?;
    if bytes.len() == 32 {
        Ok(bytes)
    } else {
        Err(KeystoreError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })
    }
}

fn tempdir() -> Result<tempfile::TempDir, KeystoreError> {
    Ok(tempfile::tempdir()?)
}

fn path_str(path: &Path) -> Result<&str, KeystoreError> {
    path.to_str()
        .ok_or_else(|| KeystoreError::Unavailable(format!("path {} is not utf-8", path.display())))
}

//! Shared fixtures for unit tests

use crate::context::MountContext;
use crate::crypto::{CipherGateway, Direction, MasterKey, KEY_SIZE};
use crate::error::{Error, Result};
use crate::fs::MirrorLayer;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Byte-wise XOR "cipher" with optional injected failure
///
/// A failing direction writes a few bytes of garbage before erroring, so
/// callers that publish partial output get caught.
#[derive(Debug, Default)]
pub struct XorGateway {
    pub fail_on: Option<Direction>,
}

impl XorGateway {
    pub fn failing_on(direction: Direction) -> Self {
        XorGateway {
            fail_on: Some(direction),
        }
    }
}

impl CipherGateway for XorGateway {
    fn transform(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        direction: Direction,
        key: &MasterKey,
    ) -> Result<()> {
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer)?;

        if self.fail_on == Some(direction) {
            output.write_all(b"partial")?;
            return Err(Error::Encryption("injected gateway failure".to_string()));
        }

        let pad = key.key()[0] ^ 0x5A;
        let transformed: Vec<u8> = buffer.iter().map(|b| b ^ pad).collect();
        output.write_all(&transformed)?;
        Ok(())
    }
}

pub fn test_key() -> MasterKey {
    MasterKey::from_bytes([7u8; KEY_SIZE])
}

pub fn mirror_with(root: &Path, gateway: impl CipherGateway + 'static) -> MirrorLayer {
    let ctx = MountContext::with_key(root.to_path_buf(), test_key());
    MirrorLayer::new(Arc::new(ctx), Arc::new(gateway))
}

/// Whether `dir` accepts `user.*` extended attributes
pub fn xattrs_supported(dir: &Path) -> bool {
    let probe = dir.join(".xattr-probe");
    if std::fs::write(&probe, b"").is_err() {
        return false;
    }
    let supported = xattr::set(&probe, "user.xcryptfs.probe", b"1").is_ok();
    let _ = std::fs::remove_file(&probe);
    supported
}

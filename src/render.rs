//! Pure renderer for the zstor configuration artifact.
//!
//! The renderer appends the deployment-specific sections to the operator's
//! base template. It never parses or mutates the base content and performs no
//! I/O, so identical inputs always produce byte-identical output; the version
//! store's duplicate detection depends on that.

use crate::backend::BackendDescriptor;
use crate::secrets::EncryptionSecret;

/// Renders the full configuration from the base template, the sorted backend
/// lists, and the deployment encryption key.
///
/// Callers must pass `meta` and `data` already sorted by namespace ordinal
/// (see [`crate::backend::sort_descriptors`]); the renderer preserves input
/// order. Both encryption blocks carry the same key. A role with zero
/// backends still emits its section header.
#[must_use]
pub fn render(
    base: &str,
    meta: &[BackendDescriptor],
    data: &[BackendDescriptor],
    key: &EncryptionSecret,
) -> String {
    let key_hex = key.to_hex();
    let mut out = String::with_capacity(base.len() + 256 + 128 * (meta.len() + data.len()));

    out.push_str(base);
    if !base.is_empty() && !base.ends_with('\n') {
        out.push('\n');
    }

    out.push('\n');
    push_encryption_block(&mut out, "[encryption]", &key_hex);
    out.push('\n');
    push_encryption_block(&mut out, "[meta.config.encryption]", &key_hex);

    for backend in meta {
        push_backend_entry(&mut out, "[[meta.config.backends]]", backend);
    }

    out.push_str("[[groups]]\n");
    for backend in data {
        push_backend_entry(&mut out, "[[groups.backends]]", backend);
    }

    out
}

fn push_encryption_block(out: &mut String, header: &str, key_hex: &str) {
    out.push_str(header);
    out.push('\n');
    out.push_str("algorithm = \"AES\"\n");
    out.push_str(&format!("key = \"{key_hex}\"\n"));
}

fn push_backend_entry(out: &mut String, header: &str, backend: &BackendDescriptor) {
    out.push_str(header);
    out.push('\n');
    out.push_str(&format!("address = \"{}\"\n", backend.address()));
    out.push_str(&format!("namespace = \"{}\"\n", backend.namespace));
    out.push_str(&format!("password = \"{}\"\n", backend.password));
    out.push('\n');
}

//! Host/guest path virtualization
//!
//! Translates filesystem paths and `file://` URIs between the host namespace
//! (what the editor sees) and the guest namespace (what a sandboxed language
//! server sees), and rewrites every URI-bearing field inside LSP JSON-RPC
//! payloads so neither side is aware of the translation.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Characters percent-escaped in the path portion of a `file://` URI.
/// `/` and `:` stay literal so separators and drive letters survive.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

// ============================================================================
// Path Mapping
// ============================================================================

/// Sandbox mount configuration returned by the host when a session starts.
///
/// Each pair maps a host-side root onto the mount point the guest process
/// observes. Absent mapping means "no sandbox: identity translation".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    /// Host workspace path (e.g., /data/user/0/.../files/projects/myapp)
    pub host_workspace: String,
    /// Guest workspace path inside the sandbox (e.g., /mnt/workspace)
    pub guest_workspace: String,
    /// Host plugin path
    pub host_plugin: String,
    /// Guest plugin path inside the sandbox (e.g., /opt/plugins/plugin-id)
    pub guest_plugin: String,
}

/// Direction of a message rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Guest namespace to host namespace (inbound traffic).
    ToHost,
    /// Host namespace to guest namespace (outbound traffic).
    ToGuest,
}

/// Bidirectional path/URI translator for one session.
///
/// Stateless after construction; safe to clone and share.
#[derive(Debug, Clone)]
pub struct PathMapper {
    mapping: Option<PathMapping>,
}

impl PathMapper {
    /// Create a mapper from an optional sandbox mapping.
    ///
    /// Roots are normalized on ingestion: backslashes become forward
    /// slashes and trailing slashes are trimmed.
    pub fn new(mapping: Option<PathMapping>) -> Self {
        let mapping = mapping.map(|m| PathMapping {
            host_workspace: normalize_root(&m.host_workspace),
            guest_workspace: normalize_root(&m.guest_workspace),
            host_plugin: normalize_root(&m.host_plugin),
            guest_plugin: normalize_root(&m.guest_plugin),
        });
        Self { mapping }
    }

    /// Identity mapper for the desktop/no-sandbox case.
    pub fn identity() -> Self {
        Self { mapping: None }
    }

    /// Whether this mapper performs any translation at all.
    pub fn is_identity(&self) -> bool {
        self.mapping.is_none()
    }

    /// Convert a host path into the `file://` URI the guest should see.
    pub fn host_path_to_file_uri(&self, host_path: &str) -> String {
        let path = normalize_separators(host_path);
        path_to_file_uri(&self.map_host_to_guest(&path))
    }

    /// Convert a guest-side `file://` URI back into a host path.
    pub fn file_uri_to_host_path(&self, file_uri: &str) -> String {
        let path = decode_file_uri(file_uri);
        self.map_guest_to_host(&path)
    }

    /// Rewrite every URI-bearing field of an LSP message.
    ///
    /// With no mapping configured this returns the input unchanged. Field
    /// detection is a convention-based heuristic over key names (`uri`,
    /// `rootUri`, `*Uri`), inherited from LSP's own naming convention; an
    /// extension field using a different convention would escape
    /// translation undetected.
    pub fn transform_message(&self, message: &Value, direction: Direction) -> Value {
        if self.mapping.is_none() {
            return message.clone();
        }
        let mut copy = message.clone();
        self.rewrite_value(&mut copy, direction);
        copy
    }

    fn rewrite_value(&self, value: &mut Value, direction: Direction) {
        match value {
            Value::Object(map) => {
                for (key, field) in map.iter_mut() {
                    match field {
                        Value::String(text)
                            if is_uri_key(key) && text.starts_with("file://") =>
                        {
                            *text = self.rewrite_uri(text, direction);
                        }
                        Value::Object(_) | Value::Array(_) => {
                            self.rewrite_value(field, direction);
                        }
                        _ => {}
                    }
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.rewrite_value(item, direction);
                }
            }
            _ => {}
        }
    }

    fn rewrite_uri(&self, uri: &str, direction: Direction) -> String {
        let path = decode_file_uri(uri);
        let mapped = match direction {
            Direction::ToGuest => self.map_host_to_guest(&path),
            Direction::ToHost => self.map_guest_to_host(&path),
        };
        path_to_file_uri(&mapped)
    }

    fn map_host_to_guest(&self, path: &str) -> String {
        let Some(mapping) = &self.mapping else {
            return path.to_string();
        };
        if let Some(suffix) = strip_root(path, &mapping.host_workspace) {
            return format!("{}{}", mapping.guest_workspace, suffix);
        }
        if let Some(suffix) = strip_root(path, &mapping.host_plugin) {
            return format!("{}{}", mapping.guest_plugin, suffix);
        }
        warn!(path, "host path outside configured sandbox mappings, passing through");
        path.to_string()
    }

    fn map_guest_to_host(&self, path: &str) -> String {
        let Some(mapping) = &self.mapping else {
            return path.to_string();
        };
        if let Some(suffix) = strip_root(path, &mapping.guest_workspace) {
            return format!("{}{}", mapping.host_workspace, suffix);
        }
        if let Some(suffix) = strip_root(path, &mapping.guest_plugin) {
            return format!("{}{}", mapping.host_plugin, suffix);
        }
        warn!(path, "guest path outside configured sandbox mappings, passing through");
        path.to_string()
    }
}

impl Default for PathMapper {
    fn default() -> Self {
        Self::identity()
    }
}

// ============================================================================
// Path / URI primitives
// ============================================================================

/// Build a `file://` URI from an already-mapped path, without translation.
pub fn file_uri_for_path(path: &str) -> String {
    path_to_file_uri(&normalize_separators(path))
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/")
}

fn normalize_root(root: &str) -> String {
    let root = normalize_separators(root);
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Detect a Windows drive-letter prefix (`C:/...`).
fn is_windows_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'/')
}

fn path_to_file_uri(path: &str) -> String {
    let encoded = utf8_percent_encode(path, PATH_ENCODE_SET);
    if is_windows_drive(path) {
        // Drive-letter paths need an extra slash: file:///C:/...
        format!("file:///{encoded}")
    } else {
        format!("file://{encoded}")
    }
}

fn decode_file_uri(file_uri: &str) -> String {
    let raw = file_uri.strip_prefix("file://").unwrap_or(file_uri);
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let path = normalize_separators(&decoded);
    // Undo the drive-letter artifact: /C:/... -> C:/...
    if let Some(rest) = path.strip_prefix('/') {
        if is_windows_drive(rest) {
            return rest.to_string();
        }
    }
    path
}

/// Longest-prefix match against a single root, boundary-aware so that
/// `/a/bc` never matches root `/a/b`. Comparison is case-sensitive.
fn strip_root<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let suffix = path.strip_prefix(root)?;
    if suffix.is_empty() || suffix.starts_with('/') {
        Some(suffix)
    } else {
        None
    }
}

fn is_uri_key(key: &str) -> bool {
    key == "uri" || key == "rootUri" || key.ends_with("Uri")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox_mapper() -> PathMapper {
        PathMapper::new(Some(PathMapping {
            host_workspace: "/data/app/files/proj".to_string(),
            guest_workspace: "/mnt/workspace".to_string(),
            host_plugin: "/data/app/files/plugins/ts".to_string(),
            guest_plugin: "/opt/plugins/ts".to_string(),
        }))
    }

    #[test]
    fn workspace_path_maps_to_guest_uri() {
        let mapper = sandbox_mapper();
        assert_eq!(
            mapper.host_path_to_file_uri("/data/app/files/proj/src/a.ts"),
            "file:///mnt/workspace/src/a.ts"
        );
    }

    #[test]
    fn plugin_path_maps_to_guest_uri() {
        let mapper = sandbox_mapper();
        assert_eq!(
            mapper.host_path_to_file_uri("/data/app/files/plugins/ts/bin/server.js"),
            "file:///opt/plugins/ts/bin/server.js"
        );
    }

    #[test]
    fn round_trip_restores_normalized_path() {
        let mapper = sandbox_mapper();
        let path = "/data/app/files/proj/nested/dir/file with space.ts";
        let uri = mapper.host_path_to_file_uri(path);
        assert_eq!(mapper.file_uri_to_host_path(&uri), path);
    }

    #[test]
    fn unmapped_path_passes_through_with_one_warning() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tracing_subscriber::layer::SubscriberExt;

        struct WarnCounter(Arc<AtomicUsize>);

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
            fn on_event(
                &self,
                event: &tracing::Event<'_>,
                _ctx: tracing_subscriber::layer::Context<'_, S>,
            ) {
                if *event.metadata().level() == tracing::Level::WARN {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let mapper = sandbox_mapper();
        assert_eq!(mapper.host_path_to_file_uri("/etc/hosts"), "file:///etc/hosts");
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_mapping_produces_direct_uri() {
        let mapper = PathMapper::identity();
        assert_eq!(
            mapper.host_path_to_file_uri("/home/u/proj/a.ts"),
            "file:///home/u/proj/a.ts"
        );
    }

    #[test]
    fn no_mapping_handles_windows_drive() {
        let mapper = PathMapper::identity();
        assert_eq!(
            mapper.host_path_to_file_uri("C:/Users/u/proj/a.ts"),
            "file:///C:/Users/u/proj/a.ts"
        );
        assert_eq!(
            mapper.file_uri_to_host_path("file:///C:/Users/u/proj/a.ts"),
            "C:/Users/u/proj/a.ts"
        );
    }

    #[test]
    fn backslashes_are_normalized_on_ingestion() {
        let mapper = PathMapper::identity();
        assert_eq!(
            mapper.host_path_to_file_uri(r"C:\Users\u\a.ts"),
            "file:///C:/Users/u/a.ts"
        );
    }

    #[test]
    fn prefix_match_is_boundary_aware() {
        let mapper = PathMapper::new(Some(PathMapping {
            host_workspace: "/a/b".to_string(),
            guest_workspace: "/mnt/w".to_string(),
            host_plugin: "/p".to_string(),
            guest_plugin: "/mnt/p".to_string(),
        }));
        // /a/bc is not under /a/b
        assert_eq!(mapper.host_path_to_file_uri("/a/bc/x"), "file:///a/bc/x");
        // the root itself maps to the guest root
        assert_eq!(mapper.host_path_to_file_uri("/a/b"), "file:///mnt/w");
    }

    #[test]
    fn percent_encoding_survives_prefix_matching() {
        let mapper = sandbox_mapper();
        let uri = "file:///mnt/workspace/dir%20name/a.ts";
        assert_eq!(
            mapper.file_uri_to_host_path(uri),
            "/data/app/files/proj/dir name/a.ts"
        );
    }

    #[test]
    fn transform_is_identity_without_mapping() {
        let mapper = PathMapper::identity();
        let message = json!({
            "method": "textDocument/didOpen",
            "params": {"textDocument": {"uri": "file:///home/u/a.ts"}}
        });
        assert_eq!(mapper.transform_message(&message, Direction::ToHost), message);
        assert_eq!(mapper.transform_message(&message, Direction::ToGuest), message);
    }

    #[test]
    fn transform_rewrites_uri_to_host() {
        let mapper = sandbox_mapper();
        let message = json!({
            "method": "textDocument/didOpen",
            "params": {"textDocument": {"uri": "file:///mnt/workspace/a.ts"}}
        });
        let rewritten = mapper.transform_message(&message, Direction::ToHost);
        assert_eq!(
            rewritten["params"]["textDocument"]["uri"],
            "file:///data/app/files/proj/a.ts"
        );
    }

    #[test]
    fn transform_rewrites_root_uri_and_suffix_keys() {
        let mapper = sandbox_mapper();
        let message = json!({
            "method": "initialize",
            "params": {
                "rootUri": "file:///data/app/files/proj",
                "targetUri": "file:///data/app/files/proj/b.ts"
            }
        });
        let rewritten = mapper.transform_message(&message, Direction::ToGuest);
        assert_eq!(rewritten["params"]["rootUri"], "file:///mnt/workspace");
        assert_eq!(rewritten["params"]["targetUri"], "file:///mnt/workspace/b.ts");
    }

    #[test]
    fn transform_walks_arrays_elementwise() {
        let mapper = sandbox_mapper();
        let message = json!({
            "result": [
                {"uri": "file:///mnt/workspace/a.ts", "range": {"start": {"line": 0}}},
                {"uri": "file:///mnt/workspace/b.ts", "range": {"start": {"line": 3}}}
            ]
        });
        let rewritten = mapper.transform_message(&message, Direction::ToHost);
        assert_eq!(rewritten["result"][0]["uri"], "file:///data/app/files/proj/a.ts");
        assert_eq!(rewritten["result"][1]["uri"], "file:///data/app/files/proj/b.ts");
    }

    #[test]
    fn transform_leaves_non_uri_fields_alone() {
        let mapper = sandbox_mapper();
        let message = json!({
            "params": {
                "text": "file:///mnt/workspace/a.ts mentioned in a string body",
                "uri": 42,
                "documentUri": "not-a-file-uri"
            }
        });
        let rewritten = mapper.transform_message(&message, Direction::ToHost);
        assert_eq!(rewritten, message);
    }

    #[test]
    fn transform_does_not_alias_the_input() {
        let mapper = sandbox_mapper();
        let message = json!({"params": {"uri": "file:///mnt/workspace/a.ts"}});
        let rewritten = mapper.transform_message(&message, Direction::ToHost);
        assert_ne!(rewritten, message);
        assert_eq!(message["params"]["uri"], "file:///mnt/workspace/a.ts");
    }

    #[test]
    fn file_uri_for_path_skips_translation() {
        assert_eq!(
            file_uri_for_path("/data/app/files/proj/a.ts"),
            "file:///data/app/files/proj/a.ts"
        );
    }
}

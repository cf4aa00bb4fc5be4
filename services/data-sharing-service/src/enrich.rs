//! Message enrichment
//!
//! Pure functions layering metadata onto a decoded message and rewriting
//! upload messages into their canonical storage URL form.

use wes_cache::AppMeta;
use wes_errors::DataServiceError;
use wes_message::{Message, MetaMap, Value};

/// Storage endpoint the cloud serves uploaded files from.
const STORAGE_URL_BASE: &str = "https://storage.sagecontinuum.org/api/v1/data";

/// Namespace segment of upload URLs.
const UPLOAD_NAMESPACE: &str = "sage";

/// Layer metadata: message fields first, then application metadata, then
/// system metadata. Later layers overwrite earlier ones, so the node-level
/// constants always win.
pub fn merge_meta(
    msg_meta: &MetaMap,
    app_meta: Option<&AppMeta>,
    system_meta: &MetaMap,
) -> MetaMap {
    let mut merged = msg_meta.clone();
    if let Some(app_meta) = app_meta {
        for (k, v) in app_meta {
            merged.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in system_meta {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// Replace an upload message's value with the canonical storage URL.
///
/// Expects the metadata to be merged already; the `node` key normally
/// arrives from system metadata.
pub fn rewrite_upload(mut msg: Message) -> Result<Message, DataServiceError> {
    let job = require_meta(&msg, "job")?.to_string();
    let task = require_meta(&msg, "task")?.to_string();
    let node = require_meta(&msg, "node")?.to_string();
    let filename = require_meta(&msg, "filename")?.to_string();
    let plugin = require_meta(&msg, "plugin")?;
    let tag = plugin_tag(plugin)?;

    msg.value = Value::Text(format!(
        "{STORAGE_URL_BASE}/{job}/{UPLOAD_NAMESPACE}-{task}-{tag}/{node}/{}-{filename}",
        msg.timestamp
    ));
    Ok(msg)
}

fn require_meta<'a>(msg: &'a Message, key: &str) -> Result<&'a str, DataServiceError> {
    msg.meta
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| DataServiceError::InvalidUploadMessage {
            reason: format!("missing meta key {key:?}"),
        })
}

/// Derive the image tag from a plugin reference.
///
/// Only the last path segment is inspected, so registry hosts with ports
/// (`localhost:5000/...`) do not confuse the split. A segment without a tag
/// maps to `latest`; more than one `:` in the segment is malformed.
fn plugin_tag(plugin: &str) -> Result<String, DataServiceError> {
    let segment = plugin.rsplit('/').next().unwrap_or(plugin);
    let pieces: Vec<&str> = segment.split(':').collect();
    match pieces.len() {
        1 => Ok("latest".to_string()),
        2 => Ok(pieces[1].to_string()),
        _ => Err(DataServiceError::InvalidUploadMessage {
            reason: format!("invalid plugin reference {plugin:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> MetaMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_priority() {
        let msg_meta = meta(&[("vsn", "ALSO-WRONG"), ("user", "u")]);
        let app_meta = meta(&[("job", "j"), ("task", "t"), ("vsn", "WRONG")]);
        let system_meta = meta(&[("node", "0000000000000001"), ("vsn", "W001")]);

        let merged = merge_meta(&msg_meta, Some(&app_meta), &system_meta);

        assert_eq!(
            merged,
            meta(&[
                ("user", "u"),
                ("job", "j"),
                ("task", "t"),
                ("vsn", "W001"),
                ("node", "0000000000000001"),
            ])
        );
    }

    #[test]
    fn test_merge_without_app_meta() {
        let msg_meta = meta(&[("sensor", "bme280")]);
        let system_meta = meta(&[("node", "n"), ("vsn", "W001")]);
        let merged = merge_meta(&msg_meta, None, &system_meta);
        assert_eq!(merged.get("sensor").map(String::as_str), Some("bme280"));
        assert_eq!(merged.get("node").map(String::as_str), Some("n"));
    }

    #[test]
    fn test_rewrite_upload_url() {
        let msg = Message::new("upload", "ignored", 1_360_287_003_083_988_472).with_meta(meta(&[
            ("job", "sage"),
            ("task", "testing"),
            ("node", "0000000000000001"),
            ("filename", "hello.txt"),
            ("plugin", "localhost:5000/ns/p:1.2.3"),
            ("user", "d"),
        ]));

        let rewritten = rewrite_upload(msg).unwrap();
        assert_eq!(rewritten.name, "upload");
        assert_eq!(
            rewritten.value.as_text(),
            Some(
                "https://storage.sagecontinuum.org/api/v1/data/sage/sage-testing-1.2.3/0000000000000001/1360287003083988472-hello.txt"
            )
        );
        // meta is preserved
        assert_eq!(rewritten.meta.get("user").map(String::as_str), Some("d"));
    }

    #[test]
    fn test_rewrite_upload_missing_key() {
        let msg = Message::new("upload", 23.1, 1).with_meta(meta(&[
            ("job", "sage"),
            ("task", "testing"),
            ("node", "n"),
            ("plugin", "ns/p:1.2.3"),
        ]));
        let err = rewrite_upload(msg).unwrap_err();
        assert!(err.to_string().contains("filename"));
    }

    #[test]
    fn test_plugin_tag_derivation() {
        assert_eq!(plugin_tag("plugin-test").unwrap(), "latest");
        assert_eq!(plugin_tag("localhost:5000/ns/p").unwrap(), "latest");
        assert_eq!(plugin_tag("ns/p:1.2.3").unwrap(), "1.2.3");
        assert_eq!(plugin_tag("localhost:5000/ns/p:1.2.3").unwrap(), "1.2.3");
        assert!(plugin_tag("a:b:c").is_err());
    }
}

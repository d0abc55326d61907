//! Argument merging: resolve the final per-connection argument map from
//! (descriptor, config defaults, query string) in the order §4.C mandates.

use std::collections::HashMap;

use crate::config::ArgumentPolicy;
use crate::error::GatewayError;

/// Protocol tags this gateway recognizes. An unrecognized `type` fails the
/// token as malformed rather than being passed through to `guacd`.
const KNOWN_TYPES: &[&str] = &["rdp", "vnc", "ssh", "telnet", "kubernetes"];

pub fn validate_type(conn_type: &str) -> Result<(), GatewayError> {
    if KNOWN_TYPES.contains(&conn_type) {
        Ok(())
    } else {
        Err(GatewayError::BadToken(format!(
            "unknown connection type '{conn_type}'"
        )))
    }
}

/// Merge descriptor arguments with config defaults and query overrides.
///
/// 1. Defaults fill in keys the descriptor omits.
/// 2. Query values overwrite keys on the per-type unencrypted allow-list,
///    provided the query value is present and non-blank.
///
/// Keys outside both policy lists are kept from the descriptor unchanged.
pub fn merge_arguments(
    conn_type: &str,
    descriptor_args: &HashMap<String, String>,
    policy: &ArgumentPolicy,
    query: &HashMap<String, String>,
) -> Result<HashMap<String, String>, GatewayError> {
    validate_type(conn_type)?;

    let mut merged = descriptor_args.clone();

    if let Some(defaults) = policy.default_arguments.get(conn_type) {
        for (key, value) in defaults {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    if let Some(allowed) = policy.unencrypted_arguments.get(conn_type) {
        for key in allowed {
            if let Some(query_value) = query.get(key) {
                if !query_value.trim().is_empty() {
                    merged.insert(key.clone(), query_value.clone());
                }
            }
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(
        defaults: &[(&str, &[(&str, &str)])],
        unencrypted: &[(&str, &[&str])],
    ) -> ArgumentPolicy {
        let mut default_arguments = HashMap::new();
        for (ty, kvs) in defaults {
            default_arguments.insert(
                (*ty).to_owned(),
                kvs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect(),
            );
        }
        let mut unencrypted_arguments = HashMap::new();
        for (ty, keys) in unencrypted {
            unencrypted_arguments.insert(
                (*ty).to_owned(),
                keys.iter().map(|k| (*k).to_owned()).collect(),
            );
        }
        ArgumentPolicy { default_arguments, unencrypted_arguments }
    }

    // S3 — default fill-in and allow-listed override, non-allow-listed key untouched.
    #[test]
    fn defaults_fill_and_allow_list_overrides() {
        let p = policy(
            &[("rdp", &[("security", "any"), ("ignore-cert", "true")])],
            &[("rdp", &["width", "height"])],
        );
        let descriptor_args: HashMap<String, String> =
            [("hostname".to_owned(), "a".to_owned())].into_iter().collect();
        let query: HashMap<String, String> = [
            ("width".to_owned(), "1920".to_owned()),
            ("height".to_owned(), "1080".to_owned()),
            ("hostname".to_owned(), "evil".to_owned()),
        ]
        .into_iter()
        .collect();

        let merged = merge_arguments("rdp", &descriptor_args, &p, &query).unwrap();

        assert_eq!(merged.get("hostname").unwrap(), "a");
        assert_eq!(merged.get("security").unwrap(), "any");
        assert_eq!(merged.get("ignore-cert").unwrap(), "true");
        assert_eq!(merged.get("width").unwrap(), "1920");
        assert_eq!(merged.get("height").unwrap(), "1080");
    }

    #[test]
    fn blank_query_value_does_not_override() {
        let p = policy(&[], &[("vnc", &["password"])]);
        let descriptor_args: HashMap<String, String> =
            [("password".to_owned(), "secret".to_owned())].into_iter().collect();
        let query: HashMap<String, String> =
            [("password".to_owned(), "   ".to_owned())].into_iter().collect();

        let merged = merge_arguments("vnc", &descriptor_args, &p, &query).unwrap();
        assert_eq!(merged.get("password").unwrap(), "secret");
    }

    #[test]
    fn unknown_type_is_bad_token() {
        let p = policy(&[], &[]);
        let err = merge_arguments("citrix", &HashMap::new(), &p, &HashMap::new()).unwrap_err();
        assert!(matches!(err, GatewayError::BadToken(_)));
    }

    #[test]
    fn descriptor_only_key_survives_untouched() {
        let p = policy(&[], &[]);
        let descriptor_args: HashMap<String, String> =
            [("domain".to_owned(), "corp".to_owned())].into_iter().collect();
        let merged = merge_arguments("rdp", &descriptor_args, &p, &HashMap::new()).unwrap();
        assert_eq!(merged.get("domain").unwrap(), "corp");
    }
}

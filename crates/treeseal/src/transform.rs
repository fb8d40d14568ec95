//! Pure leaf transforms: encrypt/decrypt every leaf and compute the MAC

use chrono::{DateTime, Utc};
use treeseal_core::{
    timestamp, Scalar, TreeBranch, TreePath, TreesealError, TreesealResult, Value,
};
use treeseal_crypto::{
    decrypt_scalar, encrypt_scalar, is_encrypted_value, CipherError, DataKey, EncryptedValue,
    MacBuilder,
};

/// A leaf is left in plaintext when any key on its path ends with `suffix`.
/// An empty suffix excludes nothing.
pub(crate) fn is_excluded(path: &TreePath, suffix: &str) -> bool {
    !suffix.is_empty() && path.keys().any(|k| k.ends_with(suffix))
}

/// Encrypt every non-excluded scalar leaf. Returns the new tree and the
/// plaintext MAC digest.
pub(crate) fn encrypt_leaves(
    key: &DataKey,
    tree: &TreeBranch,
    suffix: &str,
) -> TreesealResult<(TreeBranch, String)> {
    let mut mac = MacBuilder::new();
    let encrypted = tree.map_leaves(&mut |path: &TreePath, value: &Value| -> TreesealResult<Value> {
        match value {
            Value::Scalar(scalar) => {
                mac.update_scalar(scalar);
                if is_excluded(path, suffix) {
                    return Ok(value.clone());
                }
                let aad = path.to_string();
                encrypt_scalar(key, scalar, &aad)
                    .map(|envelope| Value::from(envelope.to_string()))
                    .map_err(|e| TreesealError::EncryptionFailed {
                        path: aad,
                        reason: e.to_string(),
                    })
            }
            Value::Null => {
                mac.update_null();
                Ok(Value::Null)
            }
            structure => Ok(structure.clone()),
        }
    })?;
    Ok((encrypted, mac.finish()))
}

/// Decrypt every non-excluded leaf, checking its path binding. Returns the
/// plaintext tree and the recomputed MAC digest.
pub(crate) fn decrypt_leaves(
    key: &DataKey,
    tree: &TreeBranch,
    suffix: &str,
) -> TreesealResult<(TreeBranch, String)> {
    let mut mac = MacBuilder::new();
    let decrypted = tree.map_leaves(&mut |path: &TreePath, value: &Value| -> TreesealResult<Value> {
        match value {
            Value::Null => {
                mac.update_null();
                Ok(Value::Null)
            }
            Value::Scalar(scalar) if is_excluded(path, suffix) => {
                mac.update_scalar(scalar);
                Ok(value.clone())
            }
            Value::Scalar(Scalar::Str(text)) if is_encrypted_value(text) => {
                let plain = decrypt_leaf(key, tree, path, text)?;
                mac.update_scalar(&plain);
                Ok(Value::Scalar(plain))
            }
            Value::Scalar(_) => Err(TreesealError::IntegrityCheckFailed(format!(
                "{path}: expected an encrypted value, found plaintext"
            ))),
            structure => Ok(structure.clone()),
        }
    })?;
    Ok((decrypted, mac.finish()))
}

fn decrypt_leaf(
    key: &DataKey,
    tree: &TreeBranch,
    path: &TreePath,
    text: &str,
) -> TreesealResult<Scalar> {
    let aad = path.to_string();
    let envelope: EncryptedValue = text
        .parse()
        .map_err(|e: CipherError| TreesealError::IntegrityCheckFailed(format!("{aad}: {e}")))?;

    match decrypt_scalar(key, &envelope, &aad) {
        Ok(plain) => Ok(plain),
        Err(CipherError::Authentication) => Err(match bound_path(key, tree, &envelope, path) {
            Some(bound_to) => TreesealError::PathBindingViolation {
                path: aad,
                bound_to: bound_to.to_string(),
            },
            None => TreesealError::IntegrityCheckFailed(format!(
                "{aad}: ciphertext failed authentication"
            )),
        }),
        Err(e) => Err(TreesealError::IntegrityCheckFailed(format!("{aad}: {e}"))),
    }
}

/// Find another leaf path of `tree` under which `envelope` authenticates.
///
/// Only paths present in `tree` are tried. A leaf moved to a key that no
/// longer exists anywhere in the document has no candidate and is reported
/// as a plain integrity failure.
fn bound_path(
    key: &DataKey,
    tree: &TreeBranch,
    envelope: &EncryptedValue,
    current: &TreePath,
) -> Option<TreePath> {
    tree.leaf_paths().into_iter().find(|candidate| {
        candidate != current
            && !matches!(
                decrypt_scalar(key, envelope, &candidate.to_string()),
                Err(CipherError::Authentication)
            )
    })
}

/// Check `key` against the encrypted leaves of `tree`: `None` when there is
/// no well-formed encrypted leaf to test, otherwise whether any of them
/// authenticates.
pub(crate) fn key_opens_any_leaf(
    key: &DataKey,
    tree: &TreeBranch,
    suffix: &str,
) -> Option<bool> {
    let mut verdict = None;
    tree.for_each_leaf(&mut |path, value| {
        if verdict == Some(true) || is_excluded(path, suffix) {
            return;
        }
        let Some(text) = value.as_str().filter(|t| is_encrypted_value(t)) else {
            return;
        };
        if let Ok(envelope) = text.parse::<EncryptedValue>() {
            verdict = Some(!matches!(
                decrypt_scalar(key, &envelope, &path.to_string()),
                Err(CipherError::Authentication)
            ));
        }
    });
    verdict
}

/// Encrypt the MAC digest, bound to the `lastmodified` timestamp.
pub(crate) fn seal_mac(
    key: &DataKey,
    digest: &str,
    last_modified: &DateTime<Utc>,
) -> TreesealResult<String> {
    encrypt_scalar(key, &Scalar::Str(digest.to_owned()), &timestamp::format(last_modified))
        .map(|envelope| envelope.to_string())
        .map_err(|e| TreesealError::IntegrityComputationFailed(e.to_string()))
}

/// Decrypt the stored MAC. When authentication fails, the key is rejected
/// only if the document has encrypted leaves and it opens none of them.
/// Otherwise the MAC itself was altered.
pub(crate) fn open_mac(
    key: &DataKey,
    sealed: &str,
    last_modified: &DateTime<Utc>,
    tree: &TreeBranch,
    suffix: &str,
) -> TreesealResult<String> {
    let envelope: EncryptedValue = sealed
        .parse()
        .map_err(|e: CipherError| TreesealError::IntegrityCheckFailed(format!("stored MAC: {e}")))?;

    match decrypt_scalar(key, &envelope, &timestamp::format(last_modified)) {
        Ok(Scalar::Str(digest)) => Ok(digest),
        Ok(other) => Err(TreesealError::IntegrityCheckFailed(format!(
            "stored MAC has type {}",
            other.kind()
        ))),
        Err(CipherError::Authentication)
            if key_opens_any_leaf(key, tree, suffix) == Some(false) =>
        {
            Err(TreesealError::InvalidDataKey(
                "recovered key authenticates neither the stored MAC nor any leaf".into(),
            ))
        }
        Err(CipherError::Authentication) => Err(TreesealError::IntegrityCheckFailed(
            "stored MAC failed authentication".into(),
        )),
        Err(e) => Err(TreesealError::IntegrityCheckFailed(format!("stored MAC: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use treeseal_crypto::generate_data_key;

    fn sample() -> TreeBranch {
        let mut db = TreeBranch::new();
        db.insert("user", "admin");
        db.insert("password", "hunter2");
        db.insert("port_unencrypted", 5432i64);

        let mut tree = TreeBranch::new();
        tree.insert("db", db);
        tree.insert("ratio", 0.75);
        tree.insert("enabled", true);
        tree.insert("nothing", Value::Null);
        tree.insert("hosts", vec![Value::from("a"), Value::from("b")]);
        tree
    }

    #[test]
    fn test_is_excluded() {
        let path: TreePath = "db.port_unencrypted".parse().unwrap();
        assert!(is_excluded(&path, "_unencrypted"));
        assert!(!is_excluded(&path, ""));

        let nested: TreePath = "config_unencrypted.inner[0]".parse().unwrap();
        assert!(is_excluded(&nested, "_unencrypted"));

        let plain: TreePath = "db.password".parse().unwrap();
        assert!(!is_excluded(&plain, "_unencrypted"));
    }

    #[test]
    fn test_roundtrip_preserves_tree_and_mac() {
        let key = generate_data_key();
        let tree = sample();

        let (encrypted, mac) = encrypt_leaves(&key, &tree, "_unencrypted").unwrap();
        assert_ne!(encrypted, tree);
        assert_eq!(
            encrypted.get_path(&"db.port_unencrypted".parse().unwrap()),
            Some(&Value::from(5432i64))
        );
        assert_eq!(encrypted.get("nothing"), Some(&Value::Null));
        assert!(encrypted.get("ratio").and_then(Value::as_str).is_some_and(is_encrypted_value));

        let (decrypted, recomputed) = decrypt_leaves(&key, &encrypted, "_unencrypted").unwrap();
        assert_eq!(decrypted, tree);
        assert_eq!(mac, recomputed);
    }

    #[test]
    fn test_swapped_ciphertexts_report_binding() {
        let key = generate_data_key();
        let mut tree = TreeBranch::new();
        tree.insert("a", "one");
        tree.insert("b", "two");

        let (mut encrypted, _) = encrypt_leaves(&key, &tree, "").unwrap();
        let a = encrypted.get("a").cloned().unwrap();
        let b = encrypted.get("b").cloned().unwrap();
        encrypted.insert("a", b);
        encrypted.insert("b", a);

        match decrypt_leaves(&key, &encrypted, "").unwrap_err() {
            TreesealError::PathBindingViolation { path, bound_to } => {
                assert_eq!(path, "a");
                assert_eq!(bound_to, "b");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_plaintext_leaf_in_encrypted_tree_is_rejected() {
        let key = generate_data_key();
        let (mut encrypted, _) = encrypt_leaves(&key, &sample(), "_unencrypted").unwrap();
        encrypted.insert("enabled", false);

        assert!(matches!(
            decrypt_leaves(&key, &encrypted, "_unencrypted"),
            Err(TreesealError::IntegrityCheckFailed(_))
        ));
    }

    #[test]
    fn test_mac_classification() {
        let key = generate_data_key();
        let (encrypted, digest) = encrypt_leaves(&key, &sample(), "_unencrypted").unwrap();
        let at = timestamp::parse("2024-01-01T00:00:00Z").unwrap();
        let sealed = seal_mac(&key, &digest, &at).unwrap();

        assert_eq!(open_mac(&key, &sealed, &at, &encrypted, "_unencrypted").unwrap(), digest);

        let later = timestamp::parse("2024-01-01T00:00:01Z").unwrap();
        assert!(matches!(
            open_mac(&key, &sealed, &later, &encrypted, "_unencrypted"),
            Err(TreesealError::IntegrityCheckFailed(_))
        ));

        let stranger = generate_data_key();
        assert!(matches!(
            open_mac(&stranger, &sealed, &at, &encrypted, "_unencrypted"),
            Err(TreesealError::InvalidDataKey(_))
        ));

        assert!(matches!(
            open_mac(&key, "ENC[garbage]", &at, &encrypted, "_unencrypted"),
            Err(TreesealError::IntegrityCheckFailed(_))
        ));
    }

    #[test]
    fn test_mac_failure_without_encrypted_leaves_is_tampering() {
        let key = generate_data_key();
        let at = timestamp::parse("2024-01-01T00:00:00Z").unwrap();

        let mut public = TreeBranch::new();
        public.insert("hint_unencrypted", "public");
        public.insert("port_unencrypted", 5432i64);

        for tree in [public, TreeBranch::new()] {
            let (encrypted, digest) = encrypt_leaves(&key, &tree, "_unencrypted").unwrap();
            assert_eq!(key_opens_any_leaf(&key, &encrypted, "_unencrypted"), None);

            let sealed = seal_mac(&key, &digest, &at).unwrap();
            let later = timestamp::parse("2024-01-01T00:00:01Z").unwrap();
            assert!(matches!(
                open_mac(&key, &sealed, &later, &encrypted, "_unencrypted"),
                Err(TreesealError::IntegrityCheckFailed(_))
            ));

            let stranger = generate_data_key();
            assert!(matches!(
                open_mac(&stranger, &sealed, &at, &encrypted, "_unencrypted"),
                Err(TreesealError::IntegrityCheckFailed(_))
            ));
        }
    }

    proptest! {
        #[test]
        fn any_leaf_edit_changes_mac(
            entries in prop::collection::btree_map("[a-z]{1,8}", any::<i32>(), 1..8),
            pick in any::<prop::sample::Index>(),
        ) {
            let key = DataKey::from_bytes([5u8; treeseal_crypto::KEY_SIZE]);
            let mut tree = TreeBranch::new();
            for (k, v) in &entries {
                tree.insert(k.as_str(), i64::from(*v));
            }
            let (_, original) = encrypt_leaves(&key, &tree, "").unwrap();

            let victim = pick.get(&entries.keys().collect::<Vec<_>>()).to_string();
            let bumped = i64::from(entries[&victim]) + 1;
            tree.insert(victim, bumped);
            let (_, edited) = encrypt_leaves(&key, &tree, "").unwrap();

            prop_assert_ne!(original, edited);
        }
    }
}

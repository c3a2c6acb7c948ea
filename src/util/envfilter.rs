/// Prefix of every control environment variable the core uses to pass mode
/// selection and inline config across a re-exec. Must never be observable by
/// the user command.
pub const CONTROL_PREFIX: &str = "MINIDOCKER_";

/// True if `key` is a control variable that must be stripped before the user
/// command starts.
pub fn is_control_var(key: &str) -> bool {
    key.starts_with(CONTROL_PREFIX)
}

/// Build the child environment: the inherited environment with every
/// `MINIDOCKER_*` key removed, then the ordered user `KEY=VALUE` entries
/// merged on top (user values win on collision; the last occurrence among
/// user entries wins when the user list itself repeats a key).
pub fn build_child_env(inherited: Vec<(String, String)>, user_env: &[String]) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = inherited
        .into_iter()
        .filter(|(k, _)| !is_control_var(k))
        .collect();

    for entry in user_env {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        if let Some(existing) = merged.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value.to_string();
        } else {
            merged.push((key.to_string(), value.to_string()));
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_vars() {
        let inherited = vec![
            ("PATH".to_string(), "/bin".to_string()),
            ("MINIDOCKER_INIT".to_string(), "1".to_string()),
            ("MINIDOCKER_STATE_PATH".to_string(), "/tmp/x".to_string()),
        ];
        let merged = build_child_env(inherited, &[]);
        assert!(merged.iter().all(|(k, _)| !is_control_var(k)));
        assert!(merged.iter().any(|(k, v)| k == "PATH" && v == "/bin"));
    }

    #[test]
    fn user_env_overrides_inherited() {
        let inherited = vec![("FOO".to_string(), "inherited".to_string())];
        let merged = build_child_env(inherited, &["FOO=overridden".to_string()]);
        assert_eq!(merged, vec![("FOO".to_string(), "overridden".to_string())]);
    }

    #[test]
    fn last_user_entry_wins_among_duplicates() {
        let merged = build_child_env(
            vec![],
            &["FOO=first".to_string(), "FOO=second".to_string()],
        );
        assert_eq!(merged, vec![("FOO".to_string(), "second".to_string())]);
    }

    #[test]
    fn appends_new_user_keys() {
        let merged = build_child_env(vec![], &["NEW=val".to_string()]);
        assert_eq!(merged, vec![("NEW".to_string(), "val".to_string())]);
    }
}

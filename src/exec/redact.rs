use once_cell::sync::Lazy;
use regex::Regex;

// Applied in order; the quoted forms must run before the bare ones.
static SENSITIVE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"-p'[^']*'", "-p'***'"),
        (r#"-p"[^"]*""#, "-p\"***\""),
        (r#"-p[^\s'"]+"#, "-p***"),
        (r"SSHPASS='[^']*'", "SSHPASS='***'"),
        (r#"SSHPASS="[^"]*""#, "SSHPASS=\"***\""),
        (r#"SSHPASS=[^\s'"]+"#, "SSHPASS=***"),
        (r"--defaults-file=\S+", "--defaults-file=***"),
        (r"echo '[A-Za-z0-9+/=]{20,}' \| base64", "echo '***' | base64"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Masks passwords, credential file paths and encoded credential blobs in a
/// command line before it is logged. The executed command is never changed.
pub fn sanitize_command_for_logging(command: &str) -> String {
    SENSITIVE_PATTERNS
        .iter()
        .fold(command.to_string(), |acc, (re, replacement)| re.replace_all(&acc, *replacement).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_mysql_password_flags() {
        let out = sanitize_command_for_logging("mysql -uuser -p'secret' -h localhost");
        assert!(!out.contains("secret"));
        assert!(out.contains("-p'***'"));

        let out = sanitize_command_for_logging("mysql -uuser -p\"secret\" db");
        assert_eq!(out, "mysql -uuser -p\"***\" db");

        let out = sanitize_command_for_logging("mysql -uuser -psecret db");
        assert_eq!(out, "mysql -uuser -p*** db");
    }

    #[test]
    fn test_masks_sshpass_and_defaults_file() {
        let out = sanitize_command_for_logging("SSHPASS='pw' sshpass -e rsync a b");
        assert!(out.starts_with("SSHPASS='***'"));
        let out = sanitize_command_for_logging("SSHPASS=pw sshpass -e rsync a b");
        assert!(out.starts_with("SSHPASS=*** "));
        let out = sanitize_command_for_logging("mysqldump --defaults-file=/tmp/.my_abc.cnf shop");
        assert_eq!(out, "mysqldump --defaults-file=*** shop");
    }

    #[test]
    fn test_masks_base64_credential_blob() {
        let out = sanitize_command_for_logging(
            "umask 077 && echo 'W2NsaWVudF0KdXNlcj1hcHAKcGFzc3dvcmQ9cHcK' | base64 -d > /tmp/.my_1.cnf",
        );
        assert!(out.contains("echo '***' | base64 -d"));
        assert!(!out.contains("W2NsaWVudF0"));
    }

    #[test]
    fn test_leaves_plain_commands_alone() {
        let command = "tar xzf /tmp/_shop_2024-01-01_10-00.sql.tar.gz -C /tmp/";
        assert_eq!(sanitize_command_for_logging(command), command);
    }
}

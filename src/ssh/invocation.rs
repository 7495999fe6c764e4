//! SSH command line parsing
//!
//! Understands just enough of the `ssh` option grammar to find the
//! destination and the remote command that git asks the server to run.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Option cluster: boolean flags, optionally ending in one value-taking flag
static OPTION_CLUSTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-([46AaCfGgKkMNnqsTtVvXxYy]+)?([bcdEeFIiJLlmOopQRSWw])?$")
        .expect("option cluster regex is valid")
});

/// Value of a parsed ssh option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Boolean flag such as `-v`
    Flag,
    /// Value-taking option such as `-l git`
    Value(String),
}

/// Parsed `ssh` argument vector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshInvocation {
    /// Effective remote user
    pub user: Option<String>,
    /// Destination host, `None` when no destination was given
    pub host: Option<String>,
    /// Options keyed by their flag character
    pub options: BTreeMap<char, OptionValue>,
    /// Everything after the destination, verbatim
    pub remote_command: Vec<String>,
}

impl SshInvocation {
    /// Parse ssh arguments (without the program name), defaulting the user
    /// to the current login user
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Self {
        Self::parse_with_default_user(args, default_user().as_deref())
    }

    /// Parse ssh arguments with an explicit fallback user
    pub fn parse_with_default_user<S: AsRef<str>>(args: &[S], default_user: Option<&str>) -> Self {
        let mut invocation = SshInvocation {
            user: default_user.map(str::to_string),
            ..Default::default()
        };
        let mut pending_option: Option<char> = None;

        for arg in args.iter().map(AsRef::as_ref) {
            if invocation.host.is_some() {
                invocation.remote_command.push(arg.to_string());
            } else if let Some(opt) = pending_option.take() {
                if opt == 'l' {
                    invocation.user = Some(arg.to_string());
                }
                invocation
                    .options
                    .insert(opt, OptionValue::Value(arg.to_string()));
            } else if let Some(caps) = OPTION_CLUSTER.captures(arg) {
                if let Some(flags) = caps.get(1) {
                    for flag in flags.as_str().chars() {
                        invocation.options.insert(flag, OptionValue::Flag);
                    }
                }
                pending_option = caps.get(2).and_then(|m| m.as_str().chars().next());
            } else if arg.is_empty() {
                // an empty token is never a destination
                continue;
            } else {
                match arg.split_once('@') {
                    Some((user, host)) if !user.is_empty() && !host.is_empty() => {
                        invocation.user = Some(user.to_string());
                        invocation.host = Some(host.to_string());
                    }
                    _ => invocation.host = Some(arg.to_string()),
                }
            }
        }

        invocation
    }

    /// Look up an option value
    pub fn option(&self, flag: char) -> Option<&OptionValue> {
        self.options.get(&flag)
    }
}

/// Git service requested through ssh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitOperation {
    UploadPack,
    ReceivePack,
    UploadArchive,
}

impl GitOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GitOperation::UploadPack => "git-upload-pack",
            GitOperation::ReceivePack => "git-receive-pack",
            GitOperation::UploadArchive => "git-upload-archive",
        }
    }

    fn from_command(command: &str) -> Option<Self> {
        match command {
            "git-upload-pack" => Some(GitOperation::UploadPack),
            "git-receive-pack" => Some(GitOperation::ReceivePack),
            "git-upload-archive" => Some(GitOperation::UploadArchive),
            _ => None,
        }
    }
}

impl fmt::Display for GitOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Git operation and repository requested by a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCommand {
    pub operation: Option<GitOperation>,
    pub repository: Option<String>,
}

impl RemoteCommand {
    /// Recognize `<git-service> <repository>`
    ///
    /// Anything else is unscoped and yields `None` for both fields. A single
    /// token holding the whole command string is split shell-style first.
    pub fn parse<S: AsRef<str>>(remote_command: &[S]) -> Self {
        let tokens: Vec<String> = match remote_command {
            [single] => shlex::split(single.as_ref()).unwrap_or_default(),
            _ => remote_command
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
        };

        let [command, repo] = tokens.as_slice() else {
            return Self::default();
        };
        let Some(operation) = GitOperation::from_command(command) else {
            return Self::default();
        };
        let repository = normalize_repository(repo);
        if repository.is_empty() {
            return Self::default();
        }

        Self {
            operation: Some(operation),
            repository: Some(repository),
        }
    }
}

/// Strip one layer of quotes, then a trailing slash and `.git`
fn normalize_repository(token: &str) -> String {
    let mut repo = token;
    for quote in ['\'', '"'] {
        if repo.len() >= 2 && repo.starts_with(quote) && repo.ends_with(quote) {
            repo = &repo[1..repo.len() - 1];
            break;
        }
    }
    let repo = repo.strip_suffix('/').unwrap_or(repo);
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    repo.to_string()
}

/// Login name of the current process owner
pub fn default_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> SshInvocation {
        SshInvocation::parse_with_default_user(args, Some("local"))
    }

    #[test]
    fn test_verbose_with_user_at_host() {
        let inv = parse(&["-v", "git@github.com"]);
        assert_eq!(inv.user.as_deref(), Some("git"));
        assert_eq!(inv.host.as_deref(), Some("github.com"));
        assert_eq!(inv.option('v'), Some(&OptionValue::Flag));
        assert!(inv.remote_command.is_empty());
    }

    #[test]
    fn test_default_user_used_without_prefix() {
        let inv = parse(&["github.com"]);
        assert_eq!(inv.user.as_deref(), Some("local"));
        assert_eq!(inv.host.as_deref(), Some("github.com"));
        assert!(inv.options.is_empty());
    }

    #[test]
    fn test_cluster_then_login_option() {
        let inv = parse(&["-v4", "-l", "git", "github.com"]);
        let mut expected = BTreeMap::new();
        expected.insert('v', OptionValue::Flag);
        expected.insert('4', OptionValue::Flag);
        expected.insert('l', OptionValue::Value("git".to_string()));
        assert_eq!(inv.options, expected);
        assert_eq!(inv.user.as_deref(), Some("git"));
        assert_eq!(inv.host.as_deref(), Some("github.com"));
        assert!(inv.remote_command.is_empty());
    }

    #[test]
    fn test_value_option_at_end_of_cluster() {
        let inv = parse(&["-v4l", "git", "github.com"]);
        assert_eq!(inv.option('l'), Some(&OptionValue::Value("git".to_string())));
        assert_eq!(inv.option('4'), Some(&OptionValue::Flag));
        assert_eq!(inv.user.as_deref(), Some("git"));
    }

    #[test]
    fn test_remote_command_taken_verbatim() {
        let inv = parse(&[
            "-v4",
            "-l",
            "git",
            "github.com",
            "git-upload-pack",
            "'tlbdk/socketauth.git'",
        ]);
        assert_eq!(
            inv.remote_command,
            vec!["git-upload-pack", "'tlbdk/socketauth.git'"]
        );
    }

    #[test]
    fn test_flags_after_destination_not_parsed() {
        let inv = parse(&["host", "-v", "ls"]);
        assert!(inv.options.is_empty());
        assert_eq!(inv.remote_command, vec!["-v", "ls"]);
    }

    #[test]
    fn test_port_option_value() {
        let inv = parse(&["-p", "2222", "git@example.com"]);
        assert_eq!(inv.option('p'), Some(&OptionValue::Value("2222".to_string())));
        assert_eq!(inv.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn test_no_destination() {
        let inv = parse(&["-v"]);
        assert!(inv.host.is_none());
        assert!(inv.remote_command.is_empty());
        assert_eq!(inv.user.as_deref(), Some("local"));
    }

    #[test]
    fn test_empty_token_is_not_a_destination() {
        let inv = parse(&[""]);
        assert!(inv.host.is_none());
        assert!(inv.options.is_empty());
        assert!(inv.remote_command.is_empty());
        assert_eq!(inv.user.as_deref(), Some("local"));
    }

    #[test]
    fn test_empty_token_before_destination_skipped() {
        let inv = parse(&["", "git@github.com", "git-upload-pack", "team/repo"]);
        assert_eq!(inv.host.as_deref(), Some("github.com"));
        assert_eq!(inv.user.as_deref(), Some("git"));
        assert_eq!(inv.remote_command, vec!["git-upload-pack", "team/repo"]);
        let rc = RemoteCommand::parse(&inv.remote_command);
        assert_eq!(rc.repository.as_deref(), Some("team/repo"));
    }

    #[test]
    fn test_login_option_overridden_by_destination_user() {
        let inv = parse(&["-l", "alice", "bob@example.com"]);
        assert_eq!(inv.user.as_deref(), Some("bob"));
    }

    #[test]
    fn test_remote_command_upload_pack() {
        let rc = RemoteCommand::parse(&["git-upload-pack", "'team/repo.git'"]);
        assert_eq!(rc.operation, Some(GitOperation::UploadPack));
        assert_eq!(rc.operation.unwrap().as_str(), "git-upload-pack");
        assert_eq!(rc.repository.as_deref(), Some("team/repo"));
    }

    #[test]
    fn test_remote_command_trailing_slash() {
        let rc = RemoteCommand::parse(&["git-receive-pack", "team/repo/"]);
        assert_eq!(rc.operation, Some(GitOperation::ReceivePack));
        assert_eq!(rc.repository.as_deref(), Some("team/repo"));
    }

    #[test]
    fn test_remote_command_single_string() {
        let rc = RemoteCommand::parse(&["git-upload-archive 'team/repo.git'"]);
        assert_eq!(rc.operation, Some(GitOperation::UploadArchive));
        assert_eq!(rc.repository.as_deref(), Some("team/repo"));
    }

    #[test]
    fn test_remote_command_missing_repository() {
        let rc = RemoteCommand::parse(&["git-upload-pack"]);
        assert_eq!(rc, RemoteCommand::default());
    }

    #[test]
    fn test_remote_command_unknown_service() {
        let rc = RemoteCommand::parse(&["rm", "-rf"]);
        assert!(rc.operation.is_none());
        assert!(rc.repository.is_none());
    }

    #[test]
    fn test_remote_command_too_many_tokens() {
        let rc = RemoteCommand::parse(&["git-upload-pack", "a", "b"]);
        assert_eq!(rc, RemoteCommand::default());
    }

    #[test]
    fn test_remote_command_empty() {
        let rc = RemoteCommand::parse::<&str>(&[]);
        assert_eq!(rc, RemoteCommand::default());
    }

    #[test]
    fn test_remote_command_empty_token() {
        assert_eq!(RemoteCommand::parse(&[""]), RemoteCommand::default());
    }
}

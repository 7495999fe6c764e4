//! Authorization context derived from an ssh invocation

use serde::Serialize;
use std::path::Path;

use super::invocation::{GitOperation, RemoteCommand, SshInvocation, default_user};

/// Who is asking, for what host, and which repository they want
///
/// Built once per tunneled request and shared read-only with every pending
/// agent request issued on its behalf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorizationContext {
    pub host: Option<String>,
    pub user: Option<String>,
    #[serde(serialize_with = "serialize_operation")]
    pub operation: Option<GitOperation>,
    pub repository: Option<String>,
}

fn serialize_operation<S: serde::Serializer>(
    op: &Option<GitOperation>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match op {
        Some(op) => serializer.serialize_some(op.as_str()),
        None => serializer.serialize_none(),
    }
}

impl AuthorizationContext {
    /// Context that authorizes only unscoped identities
    pub fn unscoped() -> Self {
        Self::default()
    }

    /// Derive a context from an ssh argument vector
    ///
    /// A leading `ssh` program token is skipped when present.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        Self::from_args_with_default_user(args, default_user().as_deref())
    }

    pub fn from_args_with_default_user<S: AsRef<str>>(
        args: &[S],
        default_user: Option<&str>,
    ) -> Self {
        let args = match args.first() {
            Some(first) if is_ssh_program(first.as_ref()) => &args[1..],
            _ => args,
        };
        let invocation = SshInvocation::parse_with_default_user(args, default_user);
        Self::from_invocation(&invocation)
    }

    pub fn from_invocation(invocation: &SshInvocation) -> Self {
        let remote = RemoteCommand::parse(&invocation.remote_command);
        Self {
            host: invocation.host.clone(),
            user: invocation.user.clone(),
            operation: remote.operation,
            repository: remote.repository,
        }
    }

    /// Whether a repository was identified
    pub fn is_scoped(&self) -> bool {
        self.repository.is_some()
    }
}

/// Whether `program` names the ssh client
pub fn is_ssh_program(program: &str) -> bool {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == "ssh")
}

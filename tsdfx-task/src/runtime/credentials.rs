// SPDX-License-Identifier: AGPL-3.0-only

//! Credentials a task's child process drops to before running.

use tsdfx_os as os;

/// Maximum supplementary group count a task may carry, matching the fixed
/// `gids[32]` array of the original C `struct tsd_task`.
pub const MAX_GIDS: usize = 32;

/// The credentials a task's child will run as.
///
/// `None` means "inherit the supervisor's own credentials, drop nothing" —
/// this is legal but is logged as a warning by [`super::spawn`] since
/// running a worker as the supervisor's (usually root) identity defeats
/// the trust-boundary point of the whole system.
#[derive(Clone, Debug, Default)]
pub struct Credentials
{
    /// A human-readable name for logging; `(uid:gid)` if set numerically.
    pub user: Option<String>,
    inner: Option<(os::uid_t, Vec<os::gid_t>)>,
}

/// Error setting task credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialsError
{
    /// Too many supplementary groups (> [`MAX_GIDS`]) or none at all.
    #[error("group count out of range")]
    GroupCount,

    /// The task wasn't idle; credentials may only be set on an idle task.
    #[error("task is not idle")]
    NotIdle,

    /// The user name did not resolve.
    #[error("user lookup failed: {0}")]
    Lookup(#[source] std::io::Error),
}

impl Credentials
{
    /// Resolve credentials from a user name via the system passwd/group
    /// database, as §4.1 "Set credentials" requires.
    pub fn from_user(name: &str) -> Result<Self, CredentialsError>
    {
        let resolved = os::lookup_user(name).map_err(CredentialsError::Lookup)?;
        Ok(Self{
            user: Some(name.to_owned()),
            inner: Some((resolved.uid, resolved.gids)),
        })
    }

    /// Set credentials explicitly: a uid plus up to [`MAX_GIDS`] gids, the
    /// first of which is the primary group.
    pub fn from_uid_gids(uid: os::uid_t, gids: &[os::gid_t]) -> Result<Self, CredentialsError>
    {
        if gids.is_empty() || gids.len() > MAX_GIDS {
            return Err(CredentialsError::GroupCount);
        }
        Ok(Self{
            user: Some(format!("({uid}:{})", gids[0])),
            inner: Some((uid, gids.to_vec())),
        })
    }

    /// The uid to drop to, if credentials were set.
    pub fn uid(&self) -> Option<os::uid_t>
    {
        self.inner.as_ref().map(|(uid, _)| *uid)
    }

    /// The gid list to drop to, if credentials were set; `gids()[0]` is
    /// the primary group.
    pub fn gids(&self) -> Option<&[os::gid_t]>
    {
        self.inner.as_ref().map(|(_, gids)| gids.as_slice())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn rejects_empty_gid_list()
    {
        assert!(matches!(
            Credentials::from_uid_gids(1000, &[]),
            Err(CredentialsError::GroupCount),
        ));
    }

    #[test]
    fn rejects_too_many_gids()
    {
        let gids = vec![0; MAX_GIDS + 1];
        assert!(matches!(
            Credentials::from_uid_gids(1000, &gids),
            Err(CredentialsError::GroupCount),
        ));
    }

    #[test]
    fn explicit_credentials_round_trip()
    {
        let creds = Credentials::from_uid_gids(1000, &[100, 101]).unwrap();
        assert_eq!(creds.uid(), Some(1000));
        assert_eq!(creds.gids(), Some(&[100, 101][..]));
    }
}

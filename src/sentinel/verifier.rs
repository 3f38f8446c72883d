//! Role verification of a candidate data node

use tracing::debug;

use crate::client::{ConnectionFactory, ControlPlane, ControlPlaneExt, RawConnection};
use crate::config::{AuthConfig, Role, ServerAddress};
use crate::sentinel::status::{ConnectionState, SharedStatus};
use crate::utils::ResolveError;

/// Role reported in the `role:` line of INFO replication
///
/// Returns `None` when the reply has no role line or an unknown role.
pub fn parse_role(info: &str) -> Option<Role> {
    info.lines().find_map(|line| {
        let value = line.trim().strip_prefix("role:")?;
        match value.trim() {
            "master" => Some(Role::Master),
            "slave" | "replica" => Some(Role::Replica),
            _ => None,
        }
    })
}

fn reports_role(info: &str) -> bool {
    info.lines().any(|line| line.trim().starts_with("role:"))
}

/// Check the role of an open connection
///
/// A reply without a role line is accepted.
pub async fn check_role<C: ControlPlane>(
    conn: &mut C,
    address: &ServerAddress,
    expected: Role,
) -> Result<(), ResolveError> {
    let info = conn.info("replication").await?;

    if !reports_role(&info) {
        debug!("{} did not report a role, accepting it", address);
        return Ok(());
    }

    match parse_role(&info) {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(ResolveError::RoleMismatch {
            address: address.to_string(),
            expected: expected.as_str(),
            actual: actual.map_or("unknown", |r| r.as_str()),
        }),
    }
}

/// Connects to candidates and confirms their role before handing them over
pub struct RoleVerifier {
    factory: ConnectionFactory,
    auth: Option<AuthConfig>,
    expected: Role,
}

impl RoleVerifier {
    /// `factory` must not carry credentials; they are sent by `verify`
    /// so the status reflects the authentication step.
    pub fn new(factory: ConnectionFactory, auth: Option<AuthConfig>, expected: Role) -> Self {
        Self {
            factory,
            auth,
            expected,
        }
    }

    /// Connect, authenticate and check the role of `address`
    ///
    /// The connection is dropped on any failure.
    pub async fn verify(
        &self,
        address: &ServerAddress,
        status: &SharedStatus,
    ) -> Result<RawConnection, ResolveError> {
        let mut conn = self.factory.create(&address.host, address.port).await?;

        if let Some(ref auth) = self.auth {
            status.set_step(ConnectionState::Authenticating);
            conn.authenticate(auth).await?;
        }

        status.set_step(ConnectionState::VerifyingRole);
        check_role(&mut conn, address, self.expected).await?;

        Ok(conn)
    }
}

//! Token-based capability checks, run before any store access.

use ordinal_core::{Capability, OrdinalConfig, TokenGrant};

use crate::error::DaemonError;

/// Resolve `token` to its grant and require `needed`.
pub fn authorize<'a>(
    config: &'a OrdinalConfig,
    token: Option<&str>,
    needed: Capability,
) -> Result<&'a TokenGrant, DaemonError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DaemonError::Permission("missing token".to_string()))?;
    let grant = config
        .grant(token)
        .ok_or_else(|| DaemonError::Permission("unknown token".to_string()))?;
    if !grant.capabilities.contains(&needed) {
        return Err(DaemonError::Permission(format!(
            "caller '{}' lacks the {} capability",
            grant.caller,
            capability_name(needed)
        )));
    }
    Ok(grant)
}

fn capability_name(capability: Capability) -> &'static str {
    match capability {
        Capability::EditRecords => "edit_records",
        Capability::Administer => "administer",
    }
}

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ApiError;

/// Maximum number of policy ARNs attached to a single target.
pub const MAX_POLICY_ARNS: usize = 5;

static ROLE_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws(-cn|-us-gov)?:iam::\d{12}:role/[A-Za-z0-9_+=,.@/-]{1,512}$")
        .expect("valid role ARN regex")
});

static POLICY_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws(-cn|-us-gov)?:iam::(\d{12}|aws):policy/[A-Za-z0-9_+=,.@/-]{1,512}$")
        .expect("valid policy ARN regex")
});

static ENV_VAR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env var regex"));

pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.len();
    if len < min || len > max {
        return Err(ApiError::Validation(format!(
            "{field} must be between {min} and {max} characters (got {len})"
        )));
    }
    Ok(())
}

/// Unwrap a required request field.
pub fn required<'a, T: ?Sized>(field: &str, value: Option<&'a T>) -> Result<&'a T, ApiError> {
    value.ok_or_else(|| ApiError::Validation(format!("{field} must be present")))
}

/// Project and target names: 4-32 ASCII alphanumerics.
pub fn check_resource_name(field: &str, value: &str) -> Result<(), ApiError> {
    check_length(field, value, 4, 32)?;
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::Validation(format!(
            "{field} must be alphanumeric"
        )));
    }
    Ok(())
}

/// Workflow names are assigned by the engine (`<project>-<target>-<suffix>`).
pub fn check_workflow_name(value: &str) -> Result<(), ApiError> {
    check_length("workflow name", value, 1, 253)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::Validation(
            "workflow name must be alphanumeric".into(),
        ));
    }
    Ok(())
}

/// Workflow template names follow Kubernetes object naming.
pub fn check_template_name(value: &str) -> Result<(), ApiError> {
    check_length("workflow_template_name", value, 1, 253)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(ApiError::Validation(
            "workflow_template_name must contain only lowercase alphanumerics, '-' or '.'".into(),
        ));
    }
    Ok(())
}

pub fn check_role_arn(value: &str) -> Result<(), ApiError> {
    if !ROLE_ARN.is_match(value) {
        return Err(ApiError::Validation(format!(
            "role_arn '{value}' is not a valid IAM role ARN"
        )));
    }
    Ok(())
}

pub fn check_policy_arns(arns: &[String]) -> Result<(), ApiError> {
    if arns.len() > MAX_POLICY_ARNS {
        return Err(ApiError::Validation(format!(
            "policy_arns cannot contain more than {MAX_POLICY_ARNS} entries"
        )));
    }
    for arn in arns {
        if !POLICY_ARN.is_match(arn) {
            return Err(ApiError::Validation(format!(
                "policy arn '{arn}' is not a valid IAM policy ARN"
            )));
        }
    }
    Ok(())
}

/// Validates a container image reference.
///
/// Accepts: `registry/image:tag`, `image:tag`, `image@sha256:abc...`
/// Rejects: shell metacharacters, whitespace, empty strings, > 500 chars.
pub fn check_container_image(field: &str, image: &str) -> Result<(), ApiError> {
    check_length(field, image, 1, 500)?;

    let forbidden = [
        ';', '&', '|', '$', '`', '\'', '"', '\\', '\n', '\r', ' ', '\t',
    ];
    if image.chars().any(|c| forbidden.contains(&c)) {
        return Err(ApiError::Validation(format!(
            "{field} contains forbidden characters"
        )));
    }

    if !image.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::Validation(format!(
            "{field} must contain alphanumeric characters"
        )));
    }

    Ok(())
}

pub fn check_repository(value: &str) -> Result<(), ApiError> {
    check_length("repository", value, 1, 2048)?;
    if value.starts_with('-') || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ApiError::Validation("invalid repository".into()));
    }
    Ok(())
}

/// Commit identifiers are passed to git as a single argument, so only
/// characters that can appear in a revision are accepted.
pub fn check_commit_hash(value: &str) -> Result<(), ApiError> {
    check_length("commit_hash", value, 1, 64)?;
    if value.starts_with('-')
        || value.contains("..")
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(ApiError::Validation("invalid commit_hash".into()));
    }
    Ok(())
}

/// Manifest paths must stay inside the checked-out tree.
pub fn check_manifest_path(value: &str) -> Result<(), ApiError> {
    check_length("path", value, 1, 4096)?;
    if value.contains('\0') || !is_contained_path(value) {
        return Err(ApiError::Validation("invalid path".into()));
    }
    Ok(())
}

/// True when `path` is relative and never climbs above its root or into `.git`.
pub fn is_contained_path(path: &str) -> bool {
    Path::new(path).components().all(|c| match c {
        Component::Normal(part) => part != ".git",
        Component::CurDir => true,
        Component::ParentDir | Component::RootDir | Component::Prefix(_) => false,
    })
}

pub fn check_env_var_name(name: &str) -> Result<(), ApiError> {
    if !ENV_VAR_NAME.is_match(name) {
        return Err(ApiError::Validation(format!(
            "environment variable name '{name}' is invalid"
        )));
    }
    Ok(())
}

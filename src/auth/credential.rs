use std::fmt;
use std::str::FromStr;

use subtle::ConstantTimeEq;

/// The only credential scheme accepted in the `Authorization` header.
pub const AUTH_SCHEME: &str = "vault";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Admin,
    User,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = AuthorizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(AuthorizationError::UnknownScope(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("authorization header must have the form scheme:scope:secret")]
    Malformed,

    #[error("unsupported authorization scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("unknown scope '{0}'")]
    UnknownScope(String),
}

/// Parsed `scheme:scope:secret` header value.
///
/// The secret may itself contain `:`; only the first two separators split.
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization {
    pub scope: Scope,
    secret: String,
}

impl Authorization {
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("scope", &self.scope)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl FromStr for Authorization {
    type Err = AuthorizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(scheme), Some(scope), Some(secret)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthorizationError::Malformed);
        };
        if scheme != AUTH_SCHEME {
            return Err(AuthorizationError::UnsupportedScheme(scheme.to_owned()));
        }
        if secret.is_empty() {
            return Err(AuthorizationError::Malformed);
        }
        Ok(Self {
            scope: scope.parse()?,
            secret: secret.to_owned(),
        })
    }
}

/// An authenticated caller.
///
/// User secrets are not checked here; they are forwarded to the secret
/// backend as that caller's token and validated there.
#[derive(Clone, PartialEq, Eq)]
pub enum Caller {
    Admin,
    User { token: String },
}

impl Caller {
    pub fn scope(&self) -> Scope {
        match self {
            Self::Admin => Scope::Admin,
            Self::User { .. } => Scope::User,
        }
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scope().as_str())
    }
}

/// Classify a raw header value. `None` means the credential is invalid.
pub fn authenticate(header: &str, admin_secret: &str) -> Option<Caller> {
    let auth: Authorization = match header.parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::debug!(error = %e, "rejected authorization header");
            return None;
        }
    };

    match auth.scope {
        Scope::Admin => {
            let matches: bool = auth
                .secret
                .as_bytes()
                .ct_eq(admin_secret.as_bytes())
                .into();
            matches.then_some(Caller::Admin)
        }
        Scope::User => Some(Caller::User { token: auth.secret }),
    }
}

pub mod iam_core;

pub use iam_core::clock::{Clock, ManualClock, SystemClock};
pub use iam_core::config::IamConfig;
pub use iam_core::credentials::{Credentials, CredentialsBuilder, ServiceIdentity};
pub use iam_core::error::IamError;
pub use iam_core::grant_helpers::TokenFlow;
pub use iam_core::http_client::{IamHttpClient, HttpMethod, HttpRequest, HttpResponse, HttpClientError, InMemoryHttpClient};
#[cfg(feature = "transport")]
pub use iam_core::http_client::ReqwestHttpClient;
pub use iam_core::permissions::{OrganizationPermissions, PermissionEvaluator, PermissionSnapshot};
pub use iam_core::request::{AuthMode, RequestBuilder};
pub use iam_core::session::SessionManager;
pub use iam_core::signer::{RequestSigner, SignedPart, SIGNATURE_HEADER, SIGNED_DATE_HEADER};
pub use iam_core::types::{Grant, SessionPhase, TokenResponse, TokenState};

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::{decode_jwt, Claims};
use crate::config;
use crate::error::ApiError;
use crate::isolation::AccessContext;

pub const APPLICATION_CODE_HEADER: &str = "x-application-code";

/// Authenticated caller extracted from the JWT and the application header
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub email: Option<String>,
    pub application_code: String,
}

impl AuthUser {
    pub fn from_claims(claims: Claims, application_code: String) -> Self {
        Self {
            tenant_id: claims.tenant_id,
            user_id: claims.user_id,
            email: claims.email,
            application_code,
        }
    }

    pub fn access_context(&self) -> AccessContext {
        AccessContext::new(self.tenant_id, self.user_id, self.application_code.clone())
    }
}

/// JWT authentication middleware that validates tokens and extracts user context
pub async fn jwt_auth_middleware(headers: HeaderMap, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let token = extract_jwt_from_headers(&headers).map_err(ApiError::unauthorized)?;
    let claims = decode_jwt(&token).map_err(|e| ApiError::unauthorized(e.to_string()))?;
    let application_code = application_code_from_headers(&headers)?;

    request
        .extensions_mut()
        .insert(AuthUser::from_claims(claims, application_code));

    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.trim().to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}

/// Application code from `X-Application-Code`, lower-cased; the configured
/// default when the header is absent
fn application_code_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    let Some(value) = headers.get(APPLICATION_CODE_HEADER) else {
        return Ok(config::config().api.default_application_code.clone());
    };

    let code = value
        .to_str()
        .map_err(|_| ApiError::bad_request("Invalid X-Application-Code header"))?
        .trim()
        .to_lowercase();

    let valid = !code.is_empty()
        && code.len() <= 64
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ApiError::bad_request(format!("Invalid application code: {}", code)));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Token abc"));
        assert!(extract_jwt_from_headers(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_jwt_from_headers(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn application_code_defaults_and_normalizes() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            application_code_from_headers(&headers).unwrap(),
            config::config().api.default_application_code
        );

        headers.insert(APPLICATION_CODE_HEADER, HeaderValue::from_static(" CRM "));
        assert_eq!(application_code_from_headers(&headers).unwrap(), "crm");

        headers.insert(APPLICATION_CODE_HEADER, HeaderValue::from_static("bad code!"));
        assert!(application_code_from_headers(&headers).is_err());
    }
}

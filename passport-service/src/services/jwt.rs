use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rsa::{pkcs8::DecodePublicKey, traits::PublicKeyParts, RsaPublicKey};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{Role, User};
use crate::utils::crypto::sha256_hex;

const ACCESS_TOKEN_USE: &str = "access";
const REFRESH_TOKEN_USE: &str = "refresh";
const MFA_PURPOSE: &str = "mfa";
pub const MFA_TOKEN_MINUTES: i64 = 5;

/// RS256 signer/verifier for every token the authority mints.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    key_id: String,
    jwk: Jwk,
    issuer: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub tenant_id: String,
    pub roles: Vec<String>,
    /// Space separated granted scopes
    pub scope: String,
    /// Grant (session) the token was minted under
    pub sid: String,
    pub jti: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub token_use: String,
}

impl AccessTokenClaims {
    pub fn roles(&self) -> Vec<Role> {
        crate::models::role::parse_roles(&self.roles)
    }
}

/// Claims for refresh tokens (long-lived). Only the hash of the encoded
/// token is persisted, on the grant row named by `sid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub sid: String,
    pub jti: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub token_use: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    pub tenant_id: String,
    pub aud: String,
    pub iss: String,
    pub preferred_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Proof that a login OTP was verified. Accepted once in place of the code,
/// and only while the user's security stamp is unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaTokenClaims {
    pub sub: String,
    pub tenant_id: String,
    pub purpose: String,
    /// SHA-256 of the security stamp at mint time
    pub stamp: String,
    pub jti: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwtService {
    /// Create a new JWT service by loading RSA keys from files
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(&config.private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                config.private_key_path,
                e
            )
        })?;

        let public_key_pem = fs::read_to_string(&config.public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                config.public_key_path,
                e
            )
        })?;

        let service = Self::from_pem(
            &private_key_pem,
            &public_key_pem,
            &config.issuer,
            config.access_token_expiry_minutes,
            config.refresh_token_expiry_days,
        )?;

        tracing::info!(kid = %service.key_id, "JWT service initialized with RS256 keys");
        Ok(service)
    }

    pub fn from_pem(
        private_key_pem: &str,
        public_key_pem: &str,
        issuer: &str,
        access_token_expiry_minutes: i64,
        refresh_token_expiry_days: i64,
    ) -> Result<Self, anyhow::Error> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| anyhow::anyhow!("Failed to parse public key for JWKS: {}", e))?;

        let key_id = sha256_hex(public_key_pem.trim())[..16].to_string();
        let jwk = Jwk {
            kty: "RSA".to_string(),
            use_: "sig".to_string(),
            alg: "RS256".to_string(),
            kid: key_id.clone(),
            n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        };

        Ok(Self {
            encoding_key,
            decoding_key,
            key_id,
            jwk,
            issuer: issuer.to_string(),
            access_token_expiry_minutes,
            refresh_token_expiry_days,
        })
    }

    fn sign<T: Serialize>(&self, claims: &T, kind: &str) -> Result<String, anyhow::Error> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {} token: {}", kind, e))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str, kind: &str) -> Result<T, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);

        let token_data = decode::<T>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid {} token: {}", kind, e))?;

        Ok(token_data.claims)
    }

    /// Mint an access token for a grant.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        roles: &[Role],
        scope: &str,
        grant_id: Uuid,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            roles: roles.iter().map(|r| r.as_str().to_string()).collect(),
            scope: scope.to_string(),
            sid: grant_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            token_use: ACCESS_TOKEN_USE.to_string(),
        };

        self.sign(&claims, "access")
    }

    /// Mint a refresh token. A fresh `jti` makes every rotation distinct.
    pub fn generate_refresh_token(
        &self,
        user_id: Uuid,
        grant_id: Uuid,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + self.refresh_token_lifetime();

        let claims = RefreshTokenClaims {
            sub: user_id.to_string(),
            sid: grant_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            token_use: REFRESH_TOKEN_USE.to_string(),
        };

        self.sign(&claims, "refresh")
    }

    pub fn generate_id_token(
        &self,
        user: &User,
        audience: &str,
        scopes: &[String],
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);
        let has = |scope: &str| scopes.iter().any(|s| s == scope);

        let claims = IdTokenClaims {
            sub: user.user_id.to_string(),
            tenant_id: user.tenant_id.to_string(),
            aud: audience.to_string(),
            iss: self.issuer.clone(),
            preferred_username: user.username.clone(),
            name: if has("profile") { user.display_name.clone() } else { None },
            email: if has("email") { user.email.clone() } else { None },
            phone_number: if has("phone") {
                user.confirmed_phone().map(str::to_string)
            } else {
                None
            },
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        self.sign(&claims, "id")
    }

    pub fn generate_mfa_token(&self, user: &User) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let claims = MfaTokenClaims {
            sub: user.user_id.to_string(),
            tenant_id: user.tenant_id.to_string(),
            purpose: MFA_PURPOSE.to_string(),
            stamp: sha256_hex(&user.security_stamp),
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(MFA_TOKEN_MINUTES)).timestamp(),
        };

        self.sign(&claims, "mfa")
    }

    /// Signature, issuer and expiry only. Grant state is checked by the caller.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let claims: AccessTokenClaims = self.verify(token, "access")?;
        if claims.token_use != ACCESS_TOKEN_USE {
            return Err(anyhow::anyhow!("Token is not an access token"));
        }
        Ok(claims)
    }

    pub fn validate_refresh_token(
        &self,
        token: &str,
    ) -> Result<RefreshTokenClaims, anyhow::Error> {
        let claims: RefreshTokenClaims = self.verify(token, "refresh")?;
        if claims.token_use != REFRESH_TOKEN_USE {
            return Err(anyhow::anyhow!("Token is not a refresh token"));
        }
        Ok(claims)
    }

    pub fn validate_mfa_token(&self, token: &str) -> Result<MfaTokenClaims, anyhow::Error> {
        let claims: MfaTokenClaims = self.verify(token, "mfa")?;
        if claims.purpose != MFA_PURPOSE {
            return Err(anyhow::anyhow!("Token is not an MFA token"));
        }
        Ok(claims)
    }

    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.jwk.clone()],
        }
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }

    pub fn refresh_token_lifetime(&self) -> Duration {
        Duration::days(self.refresh_token_expiry_days)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

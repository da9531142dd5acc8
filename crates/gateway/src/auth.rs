//! Credenciais JWT para o bridge MQTT do Cloud IoT.
//!
//! O bridge ignora o usuário; a senha é um JWT com `iat`, `exp` e `aud`
//! (= project id), assinado com a chave privada registrada do dispositivo.

use cloudbridge_core::config::{CloudConfig, JwtAlgorithm};
use cloudbridge_core::error::BridgeError;
use cloudbridge_core::transport::AuthSupplier;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

/// Antecedência máxima para renovar o token antes de expirar.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Claims exigidos pelo Cloud IoT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iat: u64,
    pub exp: u64,
    pub aud: String,
}

struct CachedToken {
    token: String,
    issued_at: u64,
}

/// Emissor de JWT com cache; renova quando o token se aproxima do `exp`.
pub struct JwtAuth {
    project_id: String,
    key: EncodingKey,
    algorithm: Algorithm,
    ttl: Duration,
    cache: Mutex<Option<CachedToken>>,
}

impl JwtAuth {
    /// Carrega a chave PEM indicada na configuração.
    pub fn from_config(cloud: &CloudConfig) -> Result<Self, BridgeError> {
        let pem = std::fs::read(&cloud.private_key_path).map_err(|e| {
            BridgeError::Auth(format!("Erro ao ler {}: {e}", cloud.private_key_path))
        })?;
        info!(
            "Criando JWT {:?} com a chave {}",
            cloud.algorithm, cloud.private_key_path
        );
        Self::from_pem(
            &cloud.project_id,
            &pem,
            cloud.algorithm,
            Duration::from_secs(cloud.token_ttl_minutes * 60),
        )
    }

    pub fn from_pem(
        project_id: &str,
        pem: &[u8],
        algorithm: JwtAlgorithm,
        ttl: Duration,
    ) -> Result<Self, BridgeError> {
        let (key, algorithm) = match algorithm {
            JwtAlgorithm::RS256 => (EncodingKey::from_rsa_pem(pem), Algorithm::RS256),
            JwtAlgorithm::ES256 => (EncodingKey::from_ec_pem(pem), Algorithm::ES256),
        };
        let key = key.map_err(|e| BridgeError::Auth(format!("Chave privada inválida: {e}")))?;

        Ok(Self {
            project_id: project_id.into(),
            key,
            algorithm,
            ttl,
            cache: Mutex::new(None),
        })
    }

    /// Assina um token novo emitido em `now` (segundos Unix).
    pub fn issue_at(&self, now: u64) -> Result<String, BridgeError> {
        let claims = Claims {
            iat: now,
            exp: now + self.ttl.as_secs(),
            aud: self.project_id.clone(),
        };
        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.key)
            .map_err(|e| BridgeError::Auth(format!("Falha ao assinar JWT: {e}")))
    }

    fn refresh_after(&self) -> u64 {
        let margin = REFRESH_MARGIN.min(self.ttl / 2);
        (self.ttl - margin).as_secs()
    }

    fn token_at(&self, now: u64) -> Result<String, BridgeError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| BridgeError::Auth("Cache de token envenenado".into()))?;

        if let Some(cached) = cache.as_ref() {
            if now.saturating_sub(cached.issued_at) < self.refresh_after() {
                return Ok(cached.token.clone());
            }
        }

        let token = self.issue_at(now)?;
        info!("JWT renovado (validade {} min)", self.ttl.as_secs() / 60);
        *cache = Some(CachedToken {
            token: token.clone(),
            issued_at: now,
        });
        Ok(token)
    }
}

impl AuthSupplier for JwtAuth {
    fn current_token(&self) -> Result<String, BridgeError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| BridgeError::Auth(format!("Relógio inválido: {e}")))?
            .as_secs();
        self.token_at(now)
    }
}

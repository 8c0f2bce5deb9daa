//! Presentation surfaces
//!
//! The editor, a public share link and an embedding iframe all fetch dashcard
//! data through their own endpoint, but carry the same parameter payload. A
//! [`Surface`] only decides the method and the path.

use crate::dashboard::{Dashboard, DashboardId, DashcardId};
use crate::error::{Error, Result};
use crate::query::CardId;
use crate::resolver::QueryParameter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// Where a dashboard is rendered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "surface", rename_all = "snake_case")]
pub enum Surface {
    /// The authenticated editor
    Editor { dashboard_id: DashboardId },
    /// An unauthenticated public link
    Public { uuid: String },
    /// A signed embedding iframe
    Embedded { token: String },
}

impl Surface {
    pub fn editor(dashboard: &Dashboard) -> Self {
        Surface::Editor {
            dashboard_id: dashboard.id,
        }
    }

    /// The public link of a dashboard; fails if it was never shared
    pub fn public(dashboard: &Dashboard) -> Result<Self> {
        match &dashboard.public_uuid {
            Some(uuid) => Ok(Surface::Public { uuid: uuid.clone() }),
            None => Err(Error::surface_unavailable("public", dashboard.id)),
        }
    }

    /// The embedding surface of a dashboard; fails unless embedding is enabled
    pub fn embedded(dashboard: &Dashboard, token: impl Into<String>) -> Result<Self> {
        if !dashboard.enable_embedding {
            return Err(Error::surface_unavailable("embedded", dashboard.id));
        }
        Ok(Surface::Embedded {
            token: token.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Surface::Editor { .. } => "editor",
            Surface::Public { .. } => "public",
            Surface::Embedded { .. } => "embedded",
        }
    }

    /// Build the data request for one dashcard
    pub fn request(
        &self,
        dashcard_id: DashcardId,
        card_id: CardId,
        parameters: &[QueryParameter],
    ) -> Result<DashcardRequest> {
        let (method, path) = match self {
            Surface::Editor { dashboard_id } => (
                HttpMethod::Post,
                format!(
                    "/api/dashboard/{}/dashcard/{}/card/{}/query",
                    dashboard_id, dashcard_id, card_id
                ),
            ),
            Surface::Public { uuid } => (
                HttpMethod::Get,
                format!(
                    "/api/public/dashboard/{}/dashcard/{}/card/{}",
                    uuid, dashcard_id, card_id
                ),
            ),
            Surface::Embedded { token } => (
                HttpMethod::Get,
                format!(
                    "/api/embed/dashboard/{}/dashcard/{}/card/{}",
                    token, dashcard_id, card_id
                ),
            ),
        };
        Ok(DashcardRequest {
            method,
            path,
            dashcard_id,
            card_id,
            parameters: serde_json::to_string(parameters)?,
        })
    }
}

/// A dashcard data request as sent by a surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashcardRequest {
    pub method: HttpMethod,
    pub path: String,
    pub dashcard_id: DashcardId,
    pub card_id: CardId,
    /// JSON-encoded parameter list; a request body for POST, the
    /// `parameters` query argument for GET
    pub parameters: String,
}

impl DashcardRequest {
    pub fn decode_parameters(&self) -> Result<Vec<QueryParameter>> {
        Ok(serde_json::from_str(&self.parameters)?)
    }
}

//! Profile store backed by the Cloud Firestore REST API (`users/{uid}` documents).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cookbook_shared::ProfileError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ProfileFields, ProfileStore};
use crate::identity::{AccessTokenSource, IdentityId};

const FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";
const COLLECTION: &str = "users";

const NAME: &str = "name";
const EMAIL: &str = "email";
const CREATED_AT: &str = "createdAt";
const LAST_LOGIN: &str = "lastLogin";

/// Firestore typed value. Only the kinds profiles use are modelled; other
/// kinds deserialize to an empty value and are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp_value: Option<String>,
}

impl Value {
    fn string(s: impl Into<String>) -> Self {
        Self {
            string_value: Some(s.into()),
            timestamp_value: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

fn text(doc: &Document, field: &str) -> Option<String> {
    let value = doc.fields.get(field)?;
    value
        .string_value
        .clone()
        .or_else(|| value.timestamp_value.clone())
}

fn timestamp(doc: &Document, field: &str) -> Result<Option<DateTime<Utc>>, ProfileError> {
    text(doc, field)
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ProfileError::Decode(format!("{field}: {e}")))
        })
        .transpose()
}

impl Document {
    fn into_profile(self) -> Result<ProfileFields, ProfileError> {
        Ok(ProfileFields {
            name: text(&self, NAME),
            email: text(&self, EMAIL),
            created_at: timestamp(&self, CREATED_AT)?,
            last_login: timestamp(&self, LAST_LOGIN)?,
        })
    }

    fn from_profile(fields: &ProfileFields) -> Self {
        let mut doc = Document::default();
        if let Some(name) = &fields.name {
            doc.fields.insert(NAME.into(), Value::string(name.clone()));
        }
        if let Some(email) = &fields.email {
            doc.fields.insert(EMAIL.into(), Value::string(email.clone()));
        }
        if let Some(at) = fields.created_at {
            doc.fields.insert(CREATED_AT.into(), Value::string(at.to_rfc3339()));
        }
        if let Some(at) = fields.last_login {
            doc.fields.insert(LAST_LOGIN.into(), Value::string(at.to_rfc3339()));
        }
        doc
    }
}

pub struct FirestoreProfileStore {
    client: Client,
    base_url: String,
    project_id: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl FirestoreProfileStore {
    pub fn new(
        client: Client,
        project_id: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            client,
            base_url: FIRESTORE_URL.to_string(),
            project_id: project_id.into(),
            tokens,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn document_url(&self, id: &IdentityId) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{COLLECTION}/{}",
            self.base_url.trim_end_matches('/'),
            self.project_id,
            urlencoding::encode(id.as_str())
        )
    }

    async fn bearer(&self) -> Result<String, ProfileError> {
        self.tokens
            .access_token()
            .await
            .ok_or(ProfileError::Unauthenticated)
    }
}

#[async_trait]
impl ProfileStore for FirestoreProfileStore {
    async fn get_profile(&self, id: &IdentityId) -> Result<Option<ProfileFields>, ProfileError> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(self.document_url(id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProfileError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ProfileError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(ProfileError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let doc: Document =
            serde_json::from_str(&body).map_err(|e| ProfileError::Decode(e.to_string()))?;
        doc.into_profile().map(Some)
    }

    async fn set_profile(
        &self,
        id: &IdentityId,
        fields: &ProfileFields,
        merge: bool,
    ) -> Result<(), ProfileError> {
        let doc = Document::from_profile(fields);
        if merge && doc.fields.is_empty() {
            return Ok(());
        }

        let mut request = self.client.patch(self.document_url(id));
        if merge {
            let mask: Vec<(&str, &str)> = doc
                .fields
                .keys()
                .map(|k| ("updateMask.fieldPaths", k.as_str()))
                .collect();
            request = request.query(&mask);
        }

        let token = self.bearer().await?;
        let resp = request
            .bearer_auth(token)
            .json(&doc)
            .send()
            .await
            .map_err(|e| ProfileError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProfileError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    struct StaticToken(Option<&'static str>);

    #[async_trait]
    impl AccessTokenSource for StaticToken {
        async fn access_token(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    const DOC_PATH: &str = "/v1/projects/cookbook-app/databases/(default)/documents/users/uid-1";

    fn store(server: &MockServer, token: Option<&'static str>) -> FirestoreProfileStore {
        FirestoreProfileStore::new(Client::new(), "cookbook-app", Arc::new(StaticToken(token)))
            .with_base_url(format!("{}/v1", server.uri()))
    }

    #[tokio::test]
    async fn reads_profile_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/cookbook-app/databases/(default)/documents/users/uid-1",
                "fields": {
                    "name": {"stringValue": "Julia"},
                    "createdAt": {"stringValue": "2024-01-02T03:04:05.000Z"},
                    "lastLogin": {"timestampValue": "2025-06-07T08:09:10Z"},
                    "favourites": {"arrayValue": {}}
                }
            })))
            .mount(&server)
            .await;

        let profile = store(&server, Some("tok"))
            .get_profile(&IdentityId::from("uid-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.name.as_deref(), Some("Julia"));
        assert_eq!(profile.email, None);
        assert_eq!(
            profile.created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
        assert!(profile.last_login.is_some());
    }

    #[tokio::test]
    async fn missing_document_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let profile = store(&server, Some("tok"))
            .get_profile(&IdentityId::from("uid-1"))
            .await
            .unwrap();
        assert_eq!(profile, None);
    }

    #[tokio::test]
    async fn merge_write_sends_update_mask() {
        let server = MockServer::start().await;
        let login = Utc.with_ymd_and_hms(2025, 6, 7, 8, 9, 10).unwrap();
        Mock::given(method("PATCH"))
            .and(path(DOC_PATH))
            .and(query_param("updateMask.fieldPaths", "lastLogin"))
            .and(body_json(serde_json::json!({
                "fields": {"lastLogin": {"stringValue": login.to_rfc3339()}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        store(&server, Some("tok"))
            .set_profile(
                &IdentityId::from("uid-1"),
                &ProfileFields {
                    last_login: Some(login),
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn requires_a_signed_in_user() {
        let server = MockServer::start().await;
        let err = store(&server, None)
            .get_profile(&IdentityId::from("uid-1"))
            .await
            .unwrap_err();
        assert_eq!(err, ProfileError::Unauthenticated);
    }
}

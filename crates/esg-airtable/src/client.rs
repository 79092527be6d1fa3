//! REST client for the Airtable record and Meta APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use esg_core::config::AirtableConfig;

use crate::error::{AirtableError, AirtableResult};
use crate::records::{Fields, Filter, Record, RecordStore};
use crate::schema::{SchemaSource, TableSchema};

/// Convert any `Display` error into an `AirtableError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| AirtableError::$variant(e.to_string())
    };
}

/// Page size for list requests (the API maximum).
const PAGE_SIZE: usize = 100;

/// Maximum record IDs per batch delete request.
const DELETE_BATCH: usize = 10;

#[derive(Deserialize)]
struct ListResponse {
    records: Vec<Record>,
    offset: Option<String>,
}

#[derive(Deserialize)]
struct DeletedRecord {
    #[serde(default)]
    deleted: bool,
}

#[derive(Deserialize)]
struct DeleteResponse {
    records: Vec<DeletedRecord>,
}

#[derive(Deserialize)]
struct TablesResponse {
    tables: Vec<TableSchema>,
}

/// Airtable REST client bound to one base. Cheap to clone.
#[derive(Clone)]
pub struct AirtableClient {
    http: Client,
    api_url: Url,
    base_id: String,
    token: Option<String>,
}

impl AirtableClient {
    pub fn new(
        api_url: &str,
        base_id: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> AirtableResult<Self> {
        let api_url = Url::parse(api_url).map_err(map_err!(Invalid))?;
        if api_url.cannot_be_a_base() {
            return Err(AirtableError::Invalid(format!("not a base URL: {api_url}")));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(map_err!(Request))?;
        Ok(Self {
            http,
            api_url,
            base_id: base_id.to_string(),
            token,
        })
    }

    pub fn from_config(config: &AirtableConfig, token: Option<String>) -> AirtableResult<Self> {
        Self::new(
            &config.api_url,
            &config.base_id,
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn table_url(&self, table: &str) -> Url {
        self.url(&["v0", &self.base_id, table])
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> AirtableResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_err!(Request))?;
        check_status(response).await
    }
}

/// Map non-success statuses onto the error taxonomy.
async fn check_status(response: Response) -> AirtableResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    warn!(%url, status = status.as_u16(), %body, "airtable request rejected");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AirtableError::Unauthorized(body),
        StatusCode::NOT_FOUND => AirtableError::NotFound(body),
        StatusCode::UNPROCESSABLE_ENTITY => AirtableError::Invalid(body),
        other => AirtableError::Status {
            status: other.as_u16(),
            body,
        },
    })
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn list_records(
        &self,
        table: &str,
        filter: Option<&Filter>,
    ) -> AirtableResult<Vec<Record>> {
        let formula = filter.map(Filter::to_formula);
        let page_size = PAGE_SIZE.to_string();
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("pageSize", page_size.as_str())];
            if let Some(formula) = &formula {
                query.push(("filterByFormula", formula.as_str()));
            }
            if let Some(offset) = &offset {
                query.push(("offset", offset.as_str()));
            }

            let response = self
                .send(self.http.get(self.table_url(table)).query(&query))
                .await?;
            let page: ListResponse = response.json().await.map_err(map_err!(Decode))?;
            records.extend(page.records);

            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(%table, count = records.len(), "records listed");
        Ok(records)
    }

    async fn create_record(&self, table: &str, fields: Fields) -> AirtableResult<Record> {
        let body = json!({ "fields": fields, "typecast": true });
        let response = self
            .send(self.http.post(self.table_url(table)).json(&body))
            .await?;
        let record: Record = response.json().await.map_err(map_err!(Decode))?;
        debug!(%table, id = %record.id, "record created");
        Ok(record)
    }

    async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        fields: Fields,
    ) -> AirtableResult<Record> {
        let body = json!({ "fields": fields, "typecast": true });
        let url = self.url(&["v0", &self.base_id, table, record_id]);
        let response = self.send(self.http.patch(url).json(&body)).await?;
        let record: Record = response.json().await.map_err(map_err!(Decode))?;
        debug!(%table, id = %record.id, "record updated");
        Ok(record)
    }

    async fn delete_records(&self, table: &str, record_ids: &[String]) -> AirtableResult<usize> {
        let mut deleted = 0;
        for batch in record_ids.chunks(DELETE_BATCH) {
            let query: Vec<(&str, &str)> =
                batch.iter().map(|id| ("records[]", id.as_str())).collect();
            let response = self
                .send(self.http.delete(self.table_url(table)).query(&query))
                .await?;
            let body: DeleteResponse = response.json().await.map_err(map_err!(Decode))?;
            deleted += body.records.iter().filter(|r| r.deleted).count();
        }
        debug!(%table, deleted, "records deleted");
        Ok(deleted)
    }
}

#[async_trait]
impl SchemaSource for AirtableClient {
    async fn list_tables(&self, base_id: &str) -> AirtableResult<Vec<TableSchema>> {
        let url = self.url(&["v0", "meta", "bases", base_id, "tables"]);
        let response = self.send(self.http.get(url)).await?;
        let body: TablesResponse = response.json().await.map_err(map_err!(Decode))?;
        debug!(%base_id, tables = body.tables.len(), "schema fetched");
        Ok(body.tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, RawQuery};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Impersonates the slice of the Airtable API the client uses.
    async fn spawn_fake_airtable(seen: Arc<Mutex<Vec<String>>>) -> String {
        let list_seen = seen.clone();
        let delete_seen = seen.clone();
        let router = Router::new()
            .route(
                "/v0/{base}/{table}",
                get(move |Path((_, table)): Path<(String, String)>,
                          Query(q): Query<HashMap<String, String>>| {
                    let seen = list_seen.clone();
                    async move {
                        seen.lock().unwrap().push(format!(
                            "list {table} {}",
                            q.get("filterByFormula").cloned().unwrap_or_default()
                        ));
                        match q.get("offset").map(String::as_str) {
                            None => Json(serde_json::json!({
                                "records": [{"id": "rec1", "fields": {"Key": "a"}}],
                                "offset": "page2"
                            })),
                            Some(_) => Json(serde_json::json!({
                                "records": [{"id": "rec2", "fields": {"Key": "b"}}]
                            })),
                        }
                    }
                })
                .post(|Json(body): Json<Value>| async move {
                    Json(serde_json::json!({
                        "id": "recNew",
                        "createdTime": "2026-01-01T00:00:00.000Z",
                        "fields": body["fields"].clone()
                    }))
                })
                .delete(move |RawQuery(q): RawQuery| {
                    let seen = delete_seen.clone();
                    async move {
                        let q = q.unwrap_or_default();
                        let n = q.matches("records").count();
                        seen.lock().unwrap().push(format!("delete {n}"));
                        let records: Vec<Value> = (0..n)
                            .map(|i| serde_json::json!({"id": format!("rec{i}"), "deleted": true}))
                            .collect();
                        Json(serde_json::json!({ "records": records }))
                    }
                }),
            )
            .route(
                "/v0/{base}/{table}/{record}",
                axum::routing::patch(
                    |Path((_, _, record)): Path<(String, String, String)>,
                     Json(body): Json<Value>| async move {
                        Json(serde_json::json!({"id": record, "fields": body["fields"].clone()}))
                    },
                ),
            )
            .route(
                "/v0/meta/bases/{base}/tables",
                get(|Path(base): Path<String>, headers: HeaderMap| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer patGood");
                    if !authorized || base == "appLocked" {
                        return (AxumStatus::FORBIDDEN, "INVALID_PERMISSIONS").into_response();
                    }
                    Json(serde_json::json!({
                        "tables": [{
                            "id": "tbl82H6ezrakMSkV1",
                            "name": "Company",
                            "primaryFieldId": "fldName",
                            "fields": [{"id": "fldName", "name": "Name", "type": "singleLineText"}]
                        }]
                    }))
                    .into_response()
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(url: &str, token: &str) -> AirtableClient {
        AirtableClient::new(url, "appTest", Some(token.to_string()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn list_follows_offsets_and_sends_formula() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_fake_airtable(seen.clone()).await;
        let client = client(&url, "patGood");

        let records = client
            .list_records("Preferences", Some(&Filter::eq("Key", "a")))
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, "rec2");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "list Preferences {Key} = 'a'");
    }

    #[tokio::test]
    async fn table_names_with_spaces_are_encoded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_fake_airtable(seen.clone()).await;
        let client = client(&url, "patGood");

        client.list_records("User Preferences", None).await.unwrap();
        assert!(seen.lock().unwrap()[0].starts_with("list User Preferences"));
    }

    #[tokio::test]
    async fn create_and_update_return_records() {
        let url = spawn_fake_airtable(Arc::new(Mutex::new(Vec::new()))).await;
        let client = client(&url, "patGood");

        let mut fields = Fields::new();
        fields.insert("Key".into(), "pageSize".into());
        let created = client.create_record("Preferences", fields.clone()).await.unwrap();
        assert_eq!(created.id, "recNew");
        assert_eq!(created.text("Key"), Some("pageSize"));

        let updated = client
            .update_record("Preferences", "recNew", fields)
            .await
            .unwrap();
        assert_eq!(updated.id, "recNew");
    }

    #[tokio::test]
    async fn delete_is_batched_by_ten() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_fake_airtable(seen.clone()).await;
        let client = client(&url, "patGood");

        let ids: Vec<String> = (0..23).map(|i| format!("rec{i}")).collect();
        let deleted = client.delete_records("Preferences", &ids).await.unwrap();
        assert_eq!(deleted, 23);
        assert_eq!(*seen.lock().unwrap(), vec!["delete 10", "delete 10", "delete 3"]);
    }

    #[tokio::test]
    async fn schema_listing_and_auth_failures() {
        let url = spawn_fake_airtable(Arc::new(Mutex::new(Vec::new()))).await;

        let tables = client(&url, "patGood").list_tables("appTest").await.unwrap();
        assert_eq!(tables[0].name, "Company");
        assert_eq!(tables[0].fields[0].id, "fldName");

        let err = client(&url, "patBad").list_tables("appTest").await.unwrap_err();
        assert!(err.is_auth());

        let err = client(&url, "patGood").list_tables("appLocked").await.unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn rejects_non_base_url() {
        let result = AirtableClient::new("mailto:ops@example.com", "app1", None, Duration::from_secs(1));
        assert!(matches!(result, Err(AirtableError::Invalid(_))));
    }
}

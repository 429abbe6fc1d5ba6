//! REST adapter for the hosted backend.
//!
//! Tables are read and written through the PostgREST dialect under
//! `/rest/v1/`, objects through `/storage/v1/object/`. Every request carries
//! the project API key; the signed-in user's access token, when present, is
//! sent as the bearer token so row-level policies apply.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::{Value, json};
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::application::pagination::RowRange;
use crate::application::repos::{
    FollowsRepo, InsertPostParams, LikesRepo, ObjectStorage, PostFilter, PostsRepo,
    ProfilesRepo, RepoError, StoredObject, UploadObject,
};
use crate::config::BackendSettings;
use crate::domain::entities::{FollowEdge, LikeEdge};
use crate::domain::types::{Bucket, PostId, ProfileId};

use super::error::InfraError;

const PROFILE_COLUMNS: &str = "id,name,handle,avatar_url";
const POST_COLUMNS: &str = "id,content,posted_at,attachment_url,\
author:author_id(id,name,handle,avatar_url),likes:like(profile_id)";

#[derive(Clone, Debug)]
pub struct RestBackend {
    client: Client,
    base: Url,
    api_key: String,
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(
        mut base: Url,
        api_key: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(concat!("chorus/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            api_key: api_key.into(),
            access_token,
        })
    }

    pub fn from_settings(settings: &BackendSettings) -> Result<Self, InfraError> {
        let base = settings.url.clone().ok_or_else(|| {
            InfraError::configuration("backend.url is required (use --backend-url or CHORUS__BACKEND__URL)")
        })?;
        let api_key = settings.api_key.clone().ok_or_else(|| {
            InfraError::configuration("backend.api_key is required (use --api-key or CHORUS__BACKEND__API_KEY)")
        })?;
        Self::new(base, api_key, settings.access_token.clone(), settings.timeout)
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, RepoError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| RepoError::InvalidInput {
                message: format!("bad endpoint `{path}`: {err}"),
            })?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn table(&self, table: &str, query: &[(&str, String)]) -> Result<Url, RepoError> {
        self.endpoint(&format!("rest/v1/{table}"), query)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, url)
            .header("apikey", self.api_key.as_str())
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
    }

    async fn send(&self, table: &'static str, request: RequestBuilder) -> Result<Response, RepoError> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                counter!("chorus_backend_request_total", "table" => table, "outcome" => "transport")
                    .increment(1);
                warn!(table, error = %err, "Backend request failed");
                return Err(if err.is_timeout() {
                    RepoError::Timeout
                } else {
                    RepoError::from_persistence(err)
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            counter!("chorus_backend_request_total", "table" => table, "outcome" => "ok")
                .increment(1);
            return Ok(response);
        }

        counter!("chorus_backend_request_total", "table" => table, "outcome" => "rejected")
            .increment(1);
        let body = response.text().await.unwrap_or_default();
        debug!(table, status = status.as_u16(), body = %body, "Backend rejected request");
        Err(status_error(status, &body))
    }

    async fn json(&self, table: &'static str, request: RequestBuilder) -> Result<Value, RepoError> {
        let response = self.send(table, request).await?;
        let bytes = response.bytes().await.map_err(RepoError::from_persistence)?;
        if bytes.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| RepoError::Persistence(format!("{table}: response is not JSON: {err}")))
    }

    async fn select(&self, table: &'static str, query: &[(&str, String)]) -> Result<Value, RepoError> {
        let url = self.table(table, query)?;
        self.json(table, self.request(Method::GET, url)).await
    }

    /// First row of a select, `None` when it matched nothing.
    async fn select_one(
        &self,
        table: &'static str,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, RepoError> {
        match self.select(table, query).await? {
            Value::Array(rows) => Ok(rows.into_iter().next()),
            other => Ok(Some(other)),
        }
    }

    async fn insert(&self, table: &'static str, row: Value) -> Result<(), RepoError> {
        let url = self.table(table, &[])?;
        self.send(table, self.request(Method::POST, url).json(&row))
            .await
            .map(drop)
    }

    async fn delete(&self, table: &'static str, query: &[(&str, String)]) -> Result<u64, RepoError> {
        let url = self.table(table, query)?;
        let request = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=representation");
        match self.json(table, request).await? {
            Value::Array(rows) => Ok(rows.len() as u64),
            _ => Ok(0),
        }
    }

    async fn patch(&self, table: &'static str, query: &[(&str, String)], body: Value) -> Result<(), RepoError> {
        let url = self.table(table, query)?;
        self.send(table, self.request(Method::PATCH, url).json(&body))
            .await
            .map(drop)
    }
}

fn eq(value: impl AsRef<str>) -> String {
    format!("eq.{}", value.as_ref())
}

/// `in.("a","b")`; values are quoted so reserved characters survive.
fn in_list<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted: Vec<String> = values
        .into_iter()
        .map(|value| {
            let escaped = value.as_ref().replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        })
        .collect();
    format!("in.({})", quoted.join(","))
}

fn status_error(status: StatusCode, body: &str) -> RepoError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string());

    match status {
        StatusCode::CONFLICT => RepoError::Duplicate {
            constraint: constraint_name(&message).unwrap_or(message),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepoError::Unauthorized { message },
        StatusCode::NOT_FOUND => RepoError::NotFound,
        StatusCode::BAD_REQUEST => RepoError::InvalidInput { message },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RepoError::Timeout,
        _ => RepoError::Persistence(format!("status {status}: {message}")),
    }
}

/// `duplicate key value violates unique constraint "like_pkey"` → `like_pkey`
fn constraint_name(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let len = message[start..].find('"')?;
    Some(message[start..start + len].to_string())
}

fn post_filter_query(filter: &PostFilter) -> Option<(&'static str, String)> {
    match filter {
        PostFilter::All => None,
        PostFilter::Authors(authors) => Some(("author_id", in_list(authors))),
        PostFilter::Ids(ids) => Some(("id", in_list(ids))),
        PostFilter::Author(author) => Some(("author_id", eq(author))),
    }
}

#[async_trait]
impl PostsRepo for RestBackend {
    async fn select_posts(&self, filter: &PostFilter, range: RowRange) -> Result<Value, RepoError> {
        let mut query = vec![
            ("select", POST_COLUMNS.to_string()),
            ("order", "posted_at.desc".to_string()),
            ("offset", range.from.to_string()),
            ("limit", range.row_count().to_string()),
        ];
        query.extend(post_filter_query(filter));
        self.select("post", &query).await
    }

    async fn select_post(&self, id: &PostId) -> Result<Option<Value>, RepoError> {
        self.select_one("post", &[("select", POST_COLUMNS.to_string()), ("id", eq(id))])
            .await
    }

    async fn insert_post(&self, params: InsertPostParams) -> Result<Value, RepoError> {
        let posted_at = params
            .posted_at
            .format(&Rfc3339)
            .map_err(|err| RepoError::InvalidInput {
                message: format!("posted_at: {err}"),
            })?;
        let url = self.table("post", &[("select", "id".to_string())])?;
        let request = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&json!({
                "author_id": params.author_id,
                "content": params.content,
                "posted_at": posted_at,
            }));
        match self.json("post", request).await? {
            Value::Array(rows) => rows
                .into_iter()
                .next()
                .ok_or_else(|| RepoError::Persistence("post insert returned no row".to_string())),
            row => Ok(row),
        }
    }

    async fn update_attachment(&self, id: &PostId, path: &str) -> Result<(), RepoError> {
        self.patch("post", &[("id", eq(id))], json!({ "attachment_url": path }))
            .await
    }
}

#[async_trait]
impl LikesRepo for RestBackend {
    async fn select_liked_post_ids(&self, profile: &ProfileId) -> Result<Value, RepoError> {
        self.select(
            "like",
            &[("select", "post_id".to_string()), ("profile_id", eq(profile))],
        )
        .await
    }

    async fn select_like(&self, edge: &LikeEdge) -> Result<Value, RepoError> {
        self.select(
            "like",
            &[
                ("select", "*".to_string()),
                ("profile_id", eq(&edge.profile_id)),
                ("post_id", eq(&edge.post_id)),
            ],
        )
        .await
    }

    async fn insert_like(&self, edge: &LikeEdge) -> Result<(), RepoError> {
        self.insert("like", json!(edge)).await
    }

    async fn delete_like(&self, edge: &LikeEdge) -> Result<u64, RepoError> {
        self.delete(
            "like",
            &[
                ("profile_id", eq(&edge.profile_id)),
                ("post_id", eq(&edge.post_id)),
            ],
        )
        .await
    }
}

#[async_trait]
impl FollowsRepo for RestBackend {
    async fn select_following_ids(&self, follower: &ProfileId) -> Result<Value, RepoError> {
        self.select(
            "follow",
            &[
                ("select", "following_id".to_string()),
                ("follower_id", eq(follower)),
            ],
        )
        .await
    }

    async fn select_following(&self, follower: &ProfileId) -> Result<Value, RepoError> {
        self.select(
            "follow",
            &[
                ("select", format!("following:following_id({PROFILE_COLUMNS})")),
                ("follower_id", eq(follower)),
            ],
        )
        .await
    }

    async fn select_followers(&self, followee: &ProfileId) -> Result<Value, RepoError> {
        self.select(
            "follow",
            &[
                ("select", format!("follower:follower_id({PROFILE_COLUMNS})")),
                ("following_id", eq(followee)),
            ],
        )
        .await
    }

    async fn select_follow(&self, edge: &FollowEdge) -> Result<Value, RepoError> {
        self.select(
            "follow",
            &[
                ("select", "*".to_string()),
                ("follower_id", eq(&edge.follower_id)),
                ("following_id", eq(&edge.following_id)),
            ],
        )
        .await
    }

    async fn insert_follow(&self, edge: &FollowEdge) -> Result<(), RepoError> {
        self.insert("follow", json!(edge)).await
    }

    async fn delete_follow(&self, edge: &FollowEdge) -> Result<u64, RepoError> {
        self.delete(
            "follow",
            &[
                ("follower_id", eq(&edge.follower_id)),
                ("following_id", eq(&edge.following_id)),
            ],
        )
        .await
    }
}

#[async_trait]
impl ProfilesRepo for RestBackend {
    async fn select_profile(&self, id: &ProfileId) -> Result<Option<Value>, RepoError> {
        self.select_one(
            "profile",
            &[("select", PROFILE_COLUMNS.to_string()), ("id", eq(id))],
        )
        .await
    }

    async fn update_avatar(&self, id: &ProfileId, path: Option<&str>) -> Result<(), RepoError> {
        self.patch("profile", &[("id", eq(id))], json!({ "avatar_url": path }))
            .await
    }
}

#[async_trait]
impl ObjectStorage for RestBackend {
    async fn upload(
        &self,
        bucket: Bucket,
        key: &str,
        object: UploadObject,
        upsert: bool,
    ) -> Result<StoredObject, RepoError> {
        let url = self.endpoint(&format!("storage/v1/object/{}/{key}", bucket.as_str()), &[])?;
        let request = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, object.content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(object.bytes);
        self.send("storage", request).await.map_err(|err| match err {
            RepoError::Duplicate { .. } | RepoError::Unauthorized { .. } | RepoError::Timeout => err,
            other => RepoError::Storage(other.to_string()),
        })?;
        debug!(bucket = bucket.as_str(), key, upsert, "Object uploaded");
        Ok(StoredObject {
            path: key.to_string(),
        })
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!(
            "{}storage/v1/object/public/{}/{path}",
            self.base,
            bucket.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;
    use time::macros::datetime;

    use super::*;

    fn backend(server: &MockServer) -> RestBackend {
        let base = Url::parse(&server.base_url()).expect("mock url");
        RestBackend::new(base, "anon-key", Some("user-token".to_string()), Duration::from_secs(5))
            .expect("client")
    }

    fn profile(id: &str) -> ProfileId {
        ProfileId::new(id).expect("valid id")
    }

    fn post(id: &str) -> PostId {
        PostId::new(id).expect("valid id")
    }

    #[tokio::test]
    async fn feed_page_requests_offset_limit_and_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("GET")
                    .path("/rest/v1/post")
                    .query_param("select", POST_COLUMNS)
                    .query_param("order", "posted_at.desc")
                    .query_param("offset", "25")
                    .query_param("limit", "25")
                    .query_param("author_id", "in.(\"u-1\",\"u-2\")")
                    .header("apikey", "anon-key")
                    .header("authorization", "Bearer user-token");
                then.status(200).json_body(json!([]));
            })
            .await;

        let rows = backend(&server)
            .select_posts(
                &PostFilter::Authors(vec![profile("u-1"), profile("u-2")]),
                RowRange { from: 25, to: 49 },
            )
            .await
            .expect("rows");

        mock.assert_async().await;
        assert_eq!(rows, json!([]));
    }

    #[tokio::test]
    async fn missing_post_is_none() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET")
                    .path("/rest/v1/post")
                    .query_param("id", "eq.p-404");
                then.status(200).json_body(json!([]));
            })
            .await;

        let row = backend(&server).select_post(&post("p-404")).await.expect("ok");
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn unique_violation_maps_to_duplicate() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("POST").path("/rest/v1/like");
                then.status(409).json_body(json!({
                    "code": "23505",
                    "message": "duplicate key value violates unique constraint \"like_pkey\""
                }));
            })
            .await;

        let err = backend(&server)
            .insert_like(&LikeEdge {
                profile_id: profile("u-1"),
                post_id: post("p-1"),
            })
            .await
            .expect_err("conflict");
        match err {
            RepoError::Duplicate { constraint } => assert_eq!(constraint, "like_pkey"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_reports_removed_rows() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("DELETE")
                    .path("/rest/v1/follow")
                    .query_param("follower_id", "eq.u-1")
                    .query_param("following_id", "eq.u-2")
                    .header("prefer", "return=representation");
                then.status(200).json_body(json!([]));
            })
            .await;

        let removed = backend(&server)
            .delete_follow(&FollowEdge {
                follower_id: profile("u-1"),
                following_id: profile("u-2"),
            })
            .await
            .expect("deleted");

        mock.assert_async().await;
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn insert_post_returns_the_new_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/rest/v1/post")
                    .query_param("select", "id")
                    .json_body(json!({
                        "author_id": "u-1",
                        "content": "hi",
                        "posted_at": "2025-03-01T10:00:00Z"
                    }));
                then.status(201).json_body(json!([{ "id": "p-7" }]));
            })
            .await;

        let row = backend(&server)
            .insert_post(InsertPostParams {
                author_id: profile("u-1"),
                content: "hi".to_string(),
                posted_at: datetime!(2025-03-01 10:00 UTC),
            })
            .await
            .expect("inserted");

        mock.assert_async().await;
        assert_eq!(row, json!({ "id": "p-7" }));
    }

    #[tokio::test]
    async fn upload_sends_upsert_flag_and_content_type() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/storage/v1/object/avatars/u-1")
                    .header("x-upsert", "true")
                    .header("content-type", "image/png");
                then.status(200).json_body(json!({ "Key": "avatars/u-1" }));
            })
            .await;

        let stored = backend(&server)
            .upload(
                Bucket::Avatars,
                "u-1",
                UploadObject {
                    bytes: bytes::Bytes::from_static(b"png"),
                    content_type: "image/png".to_string(),
                },
                true,
            )
            .await
            .expect("uploaded");

        mock.assert_async().await;
        assert_eq!(stored.path, "u-1");
    }

    #[tokio::test]
    async fn unauthorized_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET").path("/rest/v1/profile");
                then.status(401).json_body(json!({ "message": "JWT expired" }));
            })
            .await;

        let err = backend(&server)
            .select_profile(&profile("u-1"))
            .await
            .expect_err("unauthorized");
        assert!(matches!(err, RepoError::Unauthorized { message } if message == "JWT expired"));
    }

    #[test]
    fn public_url_points_at_public_object() {
        let base = Url::parse("https://project.example.co").expect("url");
        let backend = RestBackend::new(base, "k", None, Duration::from_secs(1)).expect("client");
        assert_eq!(
            backend.public_url(Bucket::Images, "p-1"),
            "https://project.example.co/storage/v1/object/public/images/p-1"
        );
    }

    #[test]
    fn in_list_quotes_values() {
        assert_eq!(in_list(["a", "b"]), "in.(\"a\",\"b\")");
    }

    #[test]
    fn in_list_escapes_backslashes_before_quotes() {
        assert_eq!(in_list([r#"a\b"#, r#"c"d"#]), r#"in.("a\\b","c\"d")"#);
    }
}

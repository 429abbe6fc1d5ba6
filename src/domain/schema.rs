//! Structural validation of backend responses.
//!
//! Every row that crosses the backend boundary passes through one of the
//! `parse_*` functions below. A missing or mistyped field fails the whole
//! response; nothing is coerced into a default.

use std::collections::HashSet;

use serde_json::{Map, Value};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use super::entities::{LikeRecord, PostRecord, ProfileRecord};
use super::types::{PostId, ProfileId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("expected a JSON object for {entity}")]
    NotAnObject { entity: &'static str },
    #[error("expected a JSON array of {entity} rows")]
    NotAnArray { entity: &'static str },
    #[error("{entity}: missing required field `{field}`")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },
    #[error("{entity}: field `{field}` must be {expected}")]
    WrongType {
        entity: &'static str,
        field: &'static str,
        expected: &'static str,
    },
    #[error("{entity}: field `{field}` must not be empty")]
    EmptyIdentifier {
        entity: &'static str,
        field: &'static str,
    },
    #[error("{entity}: field `{field}` is not a valid timestamp: {message}")]
    InvalidTimestamp {
        entity: &'static str,
        field: &'static str,
        message: String,
    },
    #[error("post `{post_id}` lists profile `{profile_id}` among its likes more than once")]
    DuplicateLike { post_id: String, profile_id: String },
    #[error("{entity} row {index}: {source}")]
    Row {
        entity: &'static str,
        index: usize,
        #[source]
        source: Box<SchemaError>,
    },
}

/// Field accessor bound to one JSON object.
struct Fields<'a> {
    entity: &'static str,
    object: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn of(entity: &'static str, value: &'a Value) -> Result<Self, SchemaError> {
        value
            .as_object()
            .map(|object| Self { entity, object })
            .ok_or(SchemaError::NotAnObject { entity })
    }

    fn present(&self, field: &'static str) -> Result<&'a Value, SchemaError> {
        self.object.get(field).ok_or(SchemaError::MissingField {
            entity: self.entity,
            field,
        })
    }

    fn string(&self, field: &'static str) -> Result<String, SchemaError> {
        match self.present(field)? {
            Value::String(value) => Ok(value.clone()),
            _ => Err(self.wrong_type(field, "a string")),
        }
    }

    /// Key must exist; its value may be `null`.
    fn nullable_string(&self, field: &'static str) -> Result<Option<String>, SchemaError> {
        match self.present(field)? {
            Value::Null => Ok(None),
            Value::String(value) => Ok(Some(value.clone())),
            _ => Err(self.wrong_type(field, "a string or null")),
        }
    }

    fn array(&self, field: &'static str) -> Result<&'a Vec<Value>, SchemaError> {
        self.present(field)?
            .as_array()
            .ok_or_else(|| self.wrong_type(field, "an array"))
    }

    fn post_id(&self, field: &'static str) -> Result<PostId, SchemaError> {
        let raw = self.string(field)?;
        PostId::new(raw).map_err(|_| self.empty(field))
    }

    fn profile_id(&self, field: &'static str) -> Result<ProfileId, SchemaError> {
        let raw = self.string(field)?;
        ProfileId::new(raw).map_err(|_| self.empty(field))
    }

    fn timestamp(&self, field: &'static str) -> Result<OffsetDateTime, SchemaError> {
        let invalid = |message: String| SchemaError::InvalidTimestamp {
            entity: self.entity,
            field,
            message,
        };
        match self.present(field)? {
            Value::String(raw) => {
                OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| invalid(err.to_string()))
            }
            Value::Number(millis) => {
                let millis = millis
                    .as_i64()
                    .ok_or_else(|| invalid("epoch milliseconds out of range".to_string()))?;
                OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
                    .map_err(|err| invalid(err.to_string()))
            }
            _ => Err(self.wrong_type(field, "an RFC 3339 string or epoch milliseconds")),
        }
    }

    fn wrong_type(&self, field: &'static str, expected: &'static str) -> SchemaError {
        SchemaError::WrongType {
            entity: self.entity,
            field,
            expected,
        }
    }

    fn empty(&self, field: &'static str) -> SchemaError {
        SchemaError::EmptyIdentifier {
            entity: self.entity,
            field,
        }
    }
}

fn rows<'a>(entity: &'static str, value: &'a Value) -> Result<&'a Vec<Value>, SchemaError> {
    value.as_array().ok_or(SchemaError::NotAnArray { entity })
}

fn each_row<T>(
    entity: &'static str,
    value: &Value,
    parse: impl Fn(&Value) -> Result<T, SchemaError>,
) -> Result<Vec<T>, SchemaError> {
    rows(entity, value)?
        .iter()
        .enumerate()
        .map(|(index, row)| {
            parse(row).map_err(|source| SchemaError::Row {
                entity,
                index,
                source: Box::new(source),
            })
        })
        .collect()
}

pub fn parse_profile(value: &Value) -> Result<ProfileRecord, SchemaError> {
    let fields = Fields::of("profile", value)?;
    Ok(ProfileRecord {
        id: fields.profile_id("id")?,
        name: fields.string("name")?,
        handle: fields.string("handle")?,
        avatar_url: fields.nullable_string("avatar_url")?,
    })
}

pub fn parse_post(value: &Value) -> Result<PostRecord, SchemaError> {
    let fields = Fields::of("post", value)?;
    let id = fields.post_id("id")?;

    let mut seen = HashSet::new();
    let mut likes = Vec::new();
    for like in fields.array("likes")? {
        let like_fields = Fields::of("like", like)?;
        let profile_id = like_fields.profile_id("profile_id")?;
        if !seen.insert(profile_id.clone()) {
            return Err(SchemaError::DuplicateLike {
                post_id: id.to_string(),
                profile_id: profile_id.to_string(),
            });
        }
        likes.push(LikeRecord { profile_id });
    }

    Ok(PostRecord {
        content: fields.string("content")?,
        posted_at: fields.timestamp("posted_at")?,
        attachment_url: fields.nullable_string("attachment_url")?,
        author: parse_profile(fields.present("author")?)?,
        likes,
        id,
    })
}

pub fn parse_posts(value: &Value) -> Result<Vec<PostRecord>, SchemaError> {
    each_row("post", value, parse_post)
}

/// Relationship rows embed the related profile under an alias, e.g.
/// `[{ "following": { "id": .. } }]`.
pub fn parse_embedded_profiles(
    value: &Value,
    alias: &'static str,
) -> Result<Vec<ProfileRecord>, SchemaError> {
    each_row("relationship", value, |row| {
        let fields = Fields::of("relationship", row)?;
        parse_profile(fields.present(alias)?)
    })
}

/// Extract one profile id column from edge rows, e.g. `following_id`.
pub fn parse_profile_id_column(
    value: &Value,
    column: &'static str,
) -> Result<Vec<ProfileId>, SchemaError> {
    each_row("edge", value, |row| Fields::of("edge", row)?.profile_id(column))
}

/// Extract one post id column from edge rows, e.g. `post_id`.
pub fn parse_post_id_column(
    value: &Value,
    column: &'static str,
) -> Result<Vec<PostId>, SchemaError> {
    each_row("edge", value, |row| Fields::of("edge", row)?.post_id(column))
}

/// Number of rows in an existence probe such as a like or follow lookup.
pub fn count_rows(value: &Value, entity: &'static str) -> Result<usize, SchemaError> {
    rows(entity, value).map(Vec::len)
}

/// The `{ "id": .. }` row returned by an insert.
pub fn parse_inserted_post_id(value: &Value) -> Result<PostId, SchemaError> {
    Fields::of("inserted post", value)?.post_id("id")
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn author() -> Value {
        json!({ "id": "u-1", "name": "Ada", "handle": "ada", "avatar_url": null })
    }

    fn post_row() -> Value {
        json!({
            "id": "p-1",
            "content": "first!",
            "posted_at": "2025-03-01T10:00:00.000000+00:00",
            "attachment_url": "p-1",
            "author": author(),
            "likes": [{ "profile_id": "u-2" }, { "profile_id": "u-3" }]
        })
    }

    #[test]
    fn parses_well_formed_post() {
        let post = parse_post(&post_row()).expect("valid post");
        assert_eq!(post.id.as_str(), "p-1");
        assert_eq!(post.posted_at, datetime!(2025-03-01 10:00 UTC));
        assert_eq!(post.attachment_url.as_deref(), Some("p-1"));
        assert_eq!(post.author.handle, "ada");
        assert_eq!(post.like_count(), 2);
    }

    #[test]
    fn serialized_post_parses_back_identically() {
        let post = parse_post(&post_row()).expect("valid post");
        let wire = serde_json::to_value(&post).expect("serialize");
        let reparsed = parse_post(&wire).expect("reparse");
        assert_eq!(reparsed, post);
        assert_eq!(
            reparsed.likes.iter().map(|l| l.profile_id.as_str()).collect::<Vec<_>>(),
            ["u-2", "u-3"]
        );
    }

    #[test]
    fn missing_field_fails_loudly() {
        let mut row = post_row();
        row.as_object_mut().expect("object").remove("content");
        assert_eq!(
            parse_post(&row),
            Err(SchemaError::MissingField {
                entity: "post",
                field: "content"
            })
        );
    }

    #[test]
    fn nullable_field_must_still_be_present() {
        let mut row = author();
        row.as_object_mut().expect("object").remove("avatar_url");
        assert!(matches!(
            parse_profile(&row),
            Err(SchemaError::MissingField {
                field: "avatar_url",
                ..
            })
        ));
    }

    #[test]
    fn duplicate_like_is_rejected() {
        let mut row = post_row();
        row["likes"] = json!([{ "profile_id": "u-2" }, { "profile_id": "u-2" }]);
        assert!(matches!(
            parse_post(&row),
            Err(SchemaError::DuplicateLike { .. })
        ));
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let mut row = post_row();
        row["posted_at"] = json!("yesterday");
        assert!(matches!(
            parse_post(&row),
            Err(SchemaError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn epoch_millis_are_accepted() {
        let mut row = post_row();
        row["posted_at"] = json!(1_740_823_200_000_i64);
        let post = parse_post(&row).expect("valid post");
        assert_eq!(post.posted_at, datetime!(2025-03-01 10:00 UTC));
    }

    #[test]
    fn row_errors_carry_their_index() {
        let rows = json!([post_row(), { "id": "p-2" }]);
        match parse_posts(&rows) {
            Err(SchemaError::Row { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn embedded_profiles_are_unwrapped() {
        let rows = json!([{ "following": author() }]);
        let profiles = parse_embedded_profiles(&rows, "following").expect("valid rows");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "Ada");
    }

    #[test]
    fn count_rows_requires_an_array() {
        assert_eq!(count_rows(&json!([{ "post_id": "p-1" }]), "like"), Ok(1));
        assert_eq!(
            count_rows(&json!({}), "like"),
            Err(SchemaError::NotAnArray { entity: "like" })
        );
    }

    #[test]
    fn edge_columns_reject_empty_ids() {
        let rows = json!([{ "post_id": "" }]);
        assert!(parse_post_id_column(&rows, "post_id").is_err());
    }
}

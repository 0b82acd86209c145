use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Decode, DecodeError,
    postgres::Oid,
    row::Field,
};

/// Textual JSON data.
const JSON: Oid = 114;
/// Binary JSON data, decomposed. Still text in simple query.
const JSONB: Oid = 3802;

/// Decode postgres `json` or `jsonb` value into `T`.
#[derive(Debug)]
pub struct Json<T>(pub T);

fn json_text<'a>(field: &Field<'a>) -> Result<&'a str, DecodeError> {
    match field.oid() {
        JSON | JSONB => field.try_str(),
        oid => Err(DecodeError::OidMismatch(oid)),
    }
}

impl<T> Decode for Json<T>
where
    T: DeserializeOwned,
{
    fn decode(field: Field<'_>) -> Result<Self, DecodeError> {
        serde_json::from_str(json_text(&field)?).map(Json).map_err(Into::into)
    }
}

impl Decode for serde_json::Value {
    fn decode(field: Field<'_>) -> Result<Self, DecodeError> {
        serde_json::from_str(json_text(&field)?).map_err(Into::into)
    }
}

impl<T: Serialize> Serialize for Json<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Json<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(T::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        mock::Script,
        postgres::{BackendProtocol, backend::{DataRow, RowDescription}},
        row::{Column, Row},
    };

    use std::collections::BTreeMap;

    #[test]
    fn decode_json() {
        let mut frames = Script::new()
            .row_description(&[("profile", JSONB), ("raw", JSON), ("name", 25)])
            .data_row(&[Some(r#"{"name": "kirit", "tags": ["a"]}"#), Some("[1, 2]"), Some("{}")])
            .frames()
            .into_iter();
        let desc = frames.next().unwrap();
        let data = frames.next().unwrap();
        let columns = Column::parse_all(RowDescription::decode(desc.msgtype, desc.body).unwrap()).unwrap();
        let row = Row::new(columns, DataRow::decode(data.msgtype, data.body).unwrap()).unwrap();

        let Json(profile) = row.try_get::<_, Json<BTreeMap<String, serde_json::Value>>>("profile").unwrap();
        assert_eq!(profile["name"], "kirit");
        assert_eq!(profile["tags"], serde_json::json!(["a"]));

        let raw = row.try_get::<_, serde_json::Value>("raw").unwrap();
        assert_eq!(raw, serde_json::json!([1, 2]));

        let Json(ints) = row.try_get::<_, Json<Vec<i64>>>("raw").unwrap();
        assert_eq!(ints, [1, 2]);

        assert!(matches!(
            row.try_get::<_, serde_json::Value>("name"),
            Err(DecodeError::OidMismatch(25)),
        ));
    }
}

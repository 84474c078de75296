//! `orderBy` query parameter parsing.
//!
//! The parameter has the form `field` or `field,direction`, where direction
//! is `ASC` or `DESC` (case-insensitive). Handlers parse it, then resolve the
//! public field name against an allow-list that maps it to the storage name.

use std::fmt;

use crate::error::Error;
use crate::request::Request;

const PARAM: &str = "orderBy";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc  => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self { field: field.into(), direction }
    }

    /// Reads `orderBy` from the query string, or returns `default` when it is
    /// absent or empty.
    pub fn parse(req: &Request, default: OrderBy) -> Result<Self, Error> {
        let Some(raw) = req.query(PARAM).filter(|v| !v.is_empty()) else {
            return Ok(default);
        };

        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        match parts.as_slice() {
            [field] => Ok(Self::new(*field, Direction::Asc)),
            [field, direction] => {
                let direction = match direction.to_ascii_uppercase().as_str() {
                    "ASC" => Direction::Asc,
                    "DESC" => Direction::Desc,
                    other => return Err(Error::field(PARAM, format!("unknown direction: {other}"))),
                };
                Ok(Self::new(*field, direction))
            }
            _ => Err(Error::field(PARAM, format!("unknown order: {raw}"))),
        }
    }

    /// Maps the public field name to its storage name through `fields`, a
    /// list of `(public, storage)` pairs.
    pub fn resolve(self, fields: &[(&str, &str)]) -> Result<Self, Error> {
        match fields.iter().find(|(public, _)| *public == self.field) {
            Some((_, storage)) => Ok(Self::new(*storage, self.direction)),
            None => Err(Error::field(self.field, "order field does not exist")),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;

    use super::*;

    const FIELDS: [(&str, &str); 2] = [("user_id", "user_id"), ("name", "name")];

    fn req(query: &str) -> Request {
        let uri = format!("/v1/users?{query}");
        Request::from_http(http::Request::get(uri).body(Bytes::new()).unwrap(), None)
    }

    fn default() -> OrderBy {
        OrderBy::new("user_id", Direction::Asc)
    }

    #[test]
    fn absent_parameter_uses_default() {
        assert_eq!(OrderBy::parse(&req("page=1"), default()).unwrap(), default());
    }

    #[test]
    fn field_and_direction_are_read() {
        let order = OrderBy::parse(&req("orderBy=name,desc"), default()).unwrap();
        assert_eq!(order, OrderBy::new("name", Direction::Desc));
        assert_eq!(order.resolve(&FIELDS).unwrap().field, "name");
    }

    #[test]
    fn bad_direction_is_a_validation_error() {
        let err = OrderBy::parse(&req("orderBy=name,sideways"), default()).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_field_is_a_field_error() {
        let order = OrderBy::parse(&req("orderBy=password"), default()).unwrap();
        let err = order.resolve(&FIELDS).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let doc = serde_json::to_value(err.document()).unwrap();
        assert_eq!(doc["fields"][0]["field"], "password");
    }
}

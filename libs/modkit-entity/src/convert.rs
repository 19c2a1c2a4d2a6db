//! Record/message conversion.
//!
//! [`to_message`] reads every schema field from a record (alias getter or
//! stored value), encodes it to its wire shape and writes it into a fresh
//! message. [`from_message`] goes the other way, invoking alias setters in
//! schema order so a setter can rely on aliases that precede it.
//!
//! Built-in transforms (single element; repeated properties map per element):
//!
//! | storage     | wire                                   |
//! |-------------|----------------------------------------|
//! | `GeoPt`     | `{lat, lon}` message                   |
//! | `User`      | `{email, auth_domain, user_id, ...}`   |
//! | `Key`       | url-safe key token string              |
//! | `Date`      | date-time at midnight UTC (lossy back) |
//! | `Time`      | date-time on 1970-01-01 UTC            |
//! | temporal + `string_format` | formatted string        |

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::debug;

use crate::alias::SetContext;
use crate::error::{ApiError, ConversionError};
use crate::key::Key;
use crate::message::Message;
use crate::model::{FieldRef, Property, PropertyKind, Record, RecordType};
use crate::schema::{MessageSchema, geo_pt_schema, user_schema};
use crate::value::{DEFAULT_AUTH_DOMAIN, GeoPt, UserIdentity, Value};

impl Property {
    /// Storage value to wire value.
    ///
    /// # Errors
    /// `ConversionError::TypeMismatch` when `value` is not of the property kind.
    pub fn encode(&self, value: &Value) -> Result<Value, ConversionError> {
        match value {
            Value::List(items) if self.is_repeated() => items
                .iter()
                .map(|v| self.encode_one(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            v => self.encode_one(v),
        }
    }

    /// Wire value to storage value.
    ///
    /// # Errors
    /// `ConversionError::TypeMismatch` when the wire value has the wrong
    /// shape, `ConversionError::RequiredFieldMissing` for an incomplete
    /// nested message.
    pub fn decode(&self, value: Value) -> Result<Value, ConversionError> {
        match value {
            Value::List(items) if self.is_repeated() => items
                .into_iter()
                .map(|v| self.decode_one(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            v => self.decode_one(v),
        }
    }

    fn encode_one(&self, value: &Value) -> Result<Value, ConversionError> {
        let field = self.name();
        if let Some(t) = self.transform() {
            return t.encode(field, value);
        }
        if !self.kind().accepts(value) {
            return Err(ConversionError::mismatch(field, self.kind().to_string(), value));
        }
        if let Some(format) = self.format()
            && self.kind().is_temporal()
        {
            return format_temporal(field, format, value).map(Value::String);
        }
        Ok(match value {
            Value::Date(d) => Value::DateTime(d.and_time(NaiveTime::MIN).and_utc()),
            Value::Time(t) => Value::DateTime(NaiveDate::default().and_time(*t).and_utc()),
            Value::GeoPt(pt) => Value::Message(geo_pt_message(*pt)?),
            Value::User(user) => Value::Message(user_message(user)?),
            Value::Key(key) => Value::String(key.urlsafe()),
            other => other.clone(),
        })
    }

    fn decode_one(&self, value: Value) -> Result<Value, ConversionError> {
        let field = self.name();
        if let Some(t) = self.transform() {
            let decoded = t.decode(field, value)?;
            return self.checked(decoded);
        }
        if let Some(format) = self.format()
            && self.kind().is_temporal()
        {
            return match value {
                Value::String(raw) => parse_temporal(field, self.kind(), format, &raw),
                other => Err(ConversionError::mismatch(field, "formatted string", &other)),
            };
        }
        let decoded = match (self.kind(), value) {
            (PropertyKind::Date, Value::DateTime(dt)) => Value::Date(dt.date_naive()),
            (PropertyKind::Time, Value::DateTime(dt)) => Value::Time(dt.time()),
            (PropertyKind::GeoPt, Value::Message(m)) => Value::GeoPt(geo_pt_from(field, &m)?),
            (PropertyKind::User, Value::Message(m)) => Value::User(user_from(&m)?),
            (PropertyKind::Key, Value::String(token)) => {
                Value::Key(Key::from_urlsafe(&token).map_err(|_| {
                    ConversionError::mismatch(field, "url-safe key", &Value::String(token.clone()))
                })?)
            }
            (_, other) => other,
        };
        self.checked(decoded)
    }

    fn checked(&self, value: Value) -> Result<Value, ConversionError> {
        if self.kind().accepts(&value) {
            Ok(value)
        } else {
            Err(ConversionError::mismatch(
                self.name(),
                self.kind().to_string(),
                &value,
            ))
        }
    }
}

fn format_temporal(field: &str, format: &str, value: &Value) -> Result<String, ConversionError> {
    let mut out = String::new();
    let written = match value {
        Value::DateTime(dt) => write!(out, "{}", dt.format(format)),
        Value::Date(d) => write!(out, "{}", d.format(format)),
        Value::Time(t) => write!(out, "{}", t.format(format)),
        other => return Err(ConversionError::mismatch(field, "date/time", other)),
    };
    written.map_err(|_| ConversionError::Malformed(format!("invalid format string for {field}")))?;
    Ok(out)
}

fn parse_temporal(
    field: &str,
    kind: &PropertyKind,
    format: &str,
    raw: &str,
) -> Result<Value, ConversionError> {
    let bad = || ConversionError::TypeMismatch {
        field: field.to_owned(),
        expected: format!("date/time formatted as {format}"),
        got: raw.to_owned(),
    };
    match kind {
        PropertyKind::Date => NaiveDate::parse_from_str(raw, format)
            .map(Value::Date)
            .map_err(|_| bad()),
        PropertyKind::Time => NaiveTime::parse_from_str(raw, format)
            .map(Value::Time)
            .map_err(|_| bad()),
        // Offset-aware first; a format without `%z` falls through to naive UTC
        // and a date-only format to midnight.
        _ => DateTime::parse_from_str(raw, format)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| NaiveDateTime::parse_from_str(raw, format).map(|dt| dt.and_utc()))
            .or_else(|_| {
                NaiveDate::parse_from_str(raw, format).map(|d| d.and_time(NaiveTime::MIN).and_utc())
            })
            .map(Value::DateTime)
            .map_err(|_| bad()),
    }
}

fn geo_pt_message(pt: GeoPt) -> Result<Message, ConversionError> {
    Message::new(geo_pt_schema())
        .with("lat", pt.lat)?
        .with("lon", pt.lon)
}

fn geo_pt_from(field: &str, m: &Message) -> Result<GeoPt, ConversionError> {
    m.check_initialized()?;
    let coord = |name: &str| {
        m.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| ConversionError::RequiredFieldMissing(name.to_owned()))
    };
    let (lat, lon) = (coord("lat")?, coord("lon")?);
    GeoPt::new(lat, lon).ok_or_else(|| {
        ConversionError::Malformed(format!("{field}: coordinates ({lat}, {lon}) out of range"))
    })
}

fn user_message(user: &UserIdentity) -> Result<Message, ConversionError> {
    let mut m = Message::new(user_schema())
        .with("email", user.email.as_str())?
        .with("auth_domain", user.auth_domain.as_str())?;
    if let Some(id) = &user.user_id {
        m.set("user_id", id.as_str())?;
    }
    if let Some(fed) = &user.federated_identity {
        m.set("federated_identity", fed.as_str())?;
    }
    Ok(m)
}

fn user_from(m: &Message) -> Result<UserIdentity, ConversionError> {
    let text = |name: &str| m.get(name).and_then(Value::as_str).map(str::to_owned);
    let email = text("email").ok_or_else(|| ConversionError::RequiredFieldMissing("email".to_owned()))?;
    Ok(UserIdentity {
        email,
        auth_domain: text("auth_domain").unwrap_or_else(|| DEFAULT_AUTH_DOMAIN.to_owned()),
        user_id: text("user_id"),
        federated_identity: text("federated_identity"),
    })
}

/// Encode `record` into a message of `schema`.
///
/// Fields without a value (and without a property default) stay unset.
///
/// # Errors
/// `ConversionError::UnknownField` when the schema names a field the record
/// type does not have; encode failures of individual fields.
pub fn to_message(record: &Record, schema: &Arc<MessageSchema>) -> Result<Message, ConversionError> {
    let record_type = record.record_type();
    let mut message = Message::new(Arc::clone(schema));
    for field in schema.fields() {
        let value = match record_type.field(field.name()) {
            Some(FieldRef::Alias(a)) => a.get(record),
            Some(FieldRef::Property(p)) => record
                .get(p.name())
                .or(p.default_value())
                .map(|v| p.encode(v))
                .transpose()?,
            None => return Err(ConversionError::UnknownField(field.name().to_owned())),
        };
        if let Some(value) = value {
            message.set(field.name(), value)?;
        }
    }
    Ok(message)
}

/// Decode `message` into a fresh record of `record_type`.
///
/// Fields are processed in schema order. An unset field takes the schema
/// default when there is one; otherwise a required field fails and an
/// optional one is skipped. Properties bound to the current user are
/// assigned last.
///
/// # Errors
/// `ConversionError` for missing required fields or ill-shaped values,
/// whatever an alias setter raises, and `ApiError::Unauthorized` when a
/// current-user property demands a user and there is none.
pub fn from_message(
    message: &Message,
    record_type: &Arc<RecordType>,
    ctx: &SetContext<'_>,
) -> Result<Record, ApiError> {
    let mut record = record_type.new_record();
    for field in message.schema().fields() {
        let name = field.name();
        let value = match message.get(name).or(field.default_value()) {
            Some(v) => v.clone(),
            None if field.is_required() => {
                return Err(ConversionError::RequiredFieldMissing(name.to_owned()).into());
            }
            None => continue,
        };
        match record_type.field(name) {
            Some(FieldRef::Alias(_)) => record.set_alias(name, value, ctx)?,
            Some(FieldRef::Property(p)) => {
                let value = if p.is_repeated() && !field.is_repeated() {
                    Value::List(vec![value])
                } else {
                    value
                };
                let decoded = p.decode(value)?;
                record.set(name, decoded)?;
            }
            None => return Err(ConversionError::UnknownField(name.to_owned()).into()),
        }
    }
    assign_current_user(&mut record, ctx)?;
    Ok(record)
}

fn assign_current_user(record: &mut Record, ctx: &SetContext<'_>) -> Result<(), ApiError> {
    let record_type = Arc::clone(record.record_type());
    for p in record_type.properties() {
        let Some(option) = p.current_user_option() else {
            continue;
        };
        match ctx.user {
            Some(user) => {
                debug!(property = p.name(), email = %user.email, "assigned current user");
                record.set(p.name(), Value::User(user.clone()))?;
            }
            None if option.raise_unauthorized => {
                return Err(ApiError::unauthorized("Invalid token."));
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::QueryLimits;
    use crate::model::Transform;
    use crate::schema::{Selection, WireType};
    use crate::store::MemoryDatastore;
    use chrono::TimeZone;

    #[test]
    fn geo_pt_and_user_travel_as_messages() {
        let rt = RecordType::builder("Place")
            .property(Property::geo_pt("where"))
            .property(Property::user("owner"))
            .build()
            .unwrap();
        let mut record = rt.new_record();
        record.set("where", GeoPt::new(10.0, -20.0).unwrap()).unwrap();
        record
            .set("owner", UserIdentity::new("a@example.com").with_user_id("42"))
            .unwrap();

        let schema = rt.schema(None).unwrap();
        let msg = to_message(&record, &schema).unwrap();
        let point = msg.get("where").and_then(Value::as_message).unwrap();
        assert_eq!(point.get("lat"), Some(&Value::Float(10.0)));
        let owner = msg.get("owner").and_then(Value::as_message).unwrap();
        assert_eq!(owner.get("auth_domain"), Some(&Value::from(DEFAULT_AUTH_DOMAIN)));

        let store = MemoryDatastore::new();
        let limits = QueryLimits::default();
        let back = from_message(&msg, &rt, &SetContext::new(&store, &limits)).unwrap();
        assert_eq!(back.get("where"), record.get("where"));
        assert_eq!(back.get("owner"), record.get("owner"));
    }

    #[test]
    fn out_of_range_point_is_rejected() {
        let rt = RecordType::builder("Place")
            .property(Property::geo_pt("where"))
            .build()
            .unwrap();
        let schema = rt.schema(None).unwrap();
        let point = Message::new(geo_pt_schema())
            .with("lat", 95.0)
            .unwrap()
            .with("lon", 0.0)
            .unwrap();
        let msg = Message::new(schema).with("where", point).unwrap();
        let store = MemoryDatastore::new();
        let limits = QueryLimits::default();
        let err = from_message(&msg, &rt, &SetContext::new(&store, &limits)).unwrap_err();
        assert!(matches!(err, ApiError::Conversion(ConversionError::Malformed(_))));
    }

    #[test]
    fn date_decode_drops_time_of_day() {
        let p = Property::date("day");
        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let wire = p.encode(&Value::Date(day)).unwrap();
        assert_eq!(
            wire,
            Value::DateTime(Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap())
        );
        let noon = Value::DateTime(Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).unwrap());
        assert_eq!(p.decode(noon).unwrap(), Value::Date(day));
    }

    #[test]
    fn string_format_round_trips() {
        let p = Property::date_time("at").string_format("%Y-%m-%d %H:%M");
        assert_eq!(p.wire_type(), WireType::String);
        let at = Value::DateTime(Utc.with_ymd_and_hms(2023, 7, 1, 8, 15, 0).unwrap());
        let wire = p.encode(&at).unwrap();
        assert_eq!(wire, Value::from("2023-07-01 08:15"));
        assert_eq!(p.decode(wire).unwrap(), at);
        assert!(matches!(
            p.decode(Value::from("yesterday")),
            Err(ConversionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn date_only_format_decodes_to_midnight() {
        let p = Property::date_time("day").string_format("%Y-%m-%d");
        let at = Value::DateTime(Utc.with_ymd_and_hms(2024, 3, 1, 17, 30, 0).unwrap());
        let wire = p.encode(&at).unwrap();
        assert_eq!(wire, Value::from("2024-03-01"));
        assert_eq!(
            p.decode(wire).unwrap(),
            Value::DateTime(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn offset_format_keeps_the_instant() {
        let p = Property::date_time("at").string_format("%Y-%m-%d %H:%M:%S %z");
        assert_eq!(
            p.decode(Value::from("2024-03-01 09:00:00 +0900")).unwrap(),
            Value::DateTime(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        let at = Value::DateTime(Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 9).unwrap());
        let wire = p.encode(&at).unwrap();
        assert_eq!(wire, Value::from("2024-03-01 12:05:09 +0000"));
        assert_eq!(p.decode(wire).unwrap(), at);
    }

    #[test]
    fn key_property_uses_url_safe_token() {
        let p = Property::key("owner_key");
        let key = Key::new("Owner", 5);
        let wire = p.encode(&Value::Key(key.clone())).unwrap();
        assert_eq!(wire, Value::String(key.urlsafe()));
        assert_eq!(p.decode(wire).unwrap(), Value::Key(key));
        assert!(p.decode(Value::from("???")).is_err());
    }

    #[test]
    fn custom_transform_overrides_builtin() {
        let p = Property::integer("color").with_transform(Transform::new(
            WireType::String,
            |field, v| {
                v.as_i64()
                    .map(|c| Value::String(format!("#{c:06x}")))
                    .ok_or_else(|| ConversionError::mismatch(field, "integer", v))
            },
            |field, v| {
                v.as_str()
                    .and_then(|s| s.strip_prefix('#'))
                    .and_then(|hex| i64::from_str_radix(hex, 16).ok())
                    .map(Value::Integer)
                    .ok_or_else(|| ConversionError::mismatch(field, "#rrggbb", &v))
            },
        ));
        assert_eq!(p.wire_type(), WireType::String);
        assert_eq!(p.encode(&Value::Integer(0x00ff_8000)).unwrap(), Value::from("#ff8000"));
        assert_eq!(p.decode(Value::from("#ff8000")).unwrap(), Value::Integer(0x00ff_8000));
        assert!(p.decode(Value::from("orange")).is_err());
    }

    #[test]
    fn current_user_is_assigned_or_demanded() {
        let rt = RecordType::builder("Score")
            .property(Property::integer("points"))
            .property(Property::user("player").current_user(true))
            .build()
            .unwrap();
        let schema = rt.request_schema(Some(&Selection::new(["points"]))).unwrap();
        let msg = Message::new(schema).with("points", 7_i64).unwrap();
        let store = MemoryDatastore::new();
        let limits = QueryLimits::default();

        let err = from_message(&msg, &rt, &SetContext::new(&store, &limits)).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let user = UserIdentity::new("p@example.com");
        let ctx = SetContext::new(&store, &limits).with_user(Some(&user));
        let record = from_message(&msg, &rt, &ctx).unwrap();
        assert_eq!(record.get("player"), Some(&Value::User(user.clone())));
    }

    #[test]
    fn required_field_and_defaults() {
        let rt = RecordType::builder("Thing")
            .property(Property::string("name").required())
            .property(Property::integer("count").with_default(3_i64))
            .build()
            .unwrap();
        let schema = rt.schema(None).unwrap();
        let store = MemoryDatastore::new();
        let limits = QueryLimits::default();
        let ctx = SetContext::new(&store, &limits);

        let err = from_message(&Message::new(Arc::clone(&schema)), &rt, &ctx).unwrap_err();
        assert!(matches!(
            err,
            ApiError::Conversion(ConversionError::RequiredFieldMissing(name)) if name == "name"
        ));

        let msg = Message::new(Arc::clone(&schema)).with("name", "n").unwrap();
        let record = from_message(&msg, &rt, &ctx).unwrap();
        assert_eq!(record.get("count"), Some(&Value::Integer(3)));

        let mut bare = rt.new_record();
        bare.set("name", "n").unwrap();
        let out = to_message(&bare, &schema).unwrap();
        assert_eq!(out.get("count"), Some(&Value::Integer(3)));
    }
}

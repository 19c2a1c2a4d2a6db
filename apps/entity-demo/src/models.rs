//! Sample record types served by the demo API.

use std::sync::Arc;

use modkit_entity::alias::{self, SetContext};
use modkit_entity::{
    AliasProperty, ApiError, ConversionError, EnumType, Key, KeyId, Property, Record, RecordType,
    SchemaError, Value, WireType,
};

pub const NOTE: &str = "Note";
pub const PRODUCT: &str = "Product";
pub const FOLDER: &str = "Folder";
pub const FILE: &str = "File";
pub const TASK: &str = "Task";
pub const SCORE: &str = "Score";

const FOLDER_NAME: &str = "_folder";
const FILE_NAME: &str = "_file";

/// Record types shared by every registered method.
#[derive(Clone, Debug)]
pub struct Models {
    pub note: Arc<RecordType>,
    pub product: Arc<RecordType>,
    pub folder: Arc<RecordType>,
    pub file: Arc<RecordType>,
    pub task: Arc<RecordType>,
    pub score: Arc<RecordType>,
}

impl Models {
    /// # Errors
    /// Only on an inconsistent declaration.
    pub fn declare() -> Result<Self, SchemaError> {
        Ok(Self {
            note: note()?,
            product: product()?,
            folder: folder()?,
            file: file()?,
            task: task()?,
            score: score()?,
        })
    }

    #[must_use]
    pub fn all(&self) -> [&Arc<RecordType>; 6] {
        [
            &self.note,
            &self.product,
            &self.folder,
            &self.file,
            &self.task,
            &self.score,
        ]
    }
}

fn note() -> Result<Arc<RecordType>, SchemaError> {
    RecordType::builder(NOTE)
        .property(Property::string("attr1"))
        .property(Property::string("attr2"))
        .property(Property::date_time("created").auto_now_add())
        .build()
}

/// Products are addressed by a caller-chosen string name.
fn product() -> Result<Arc<RecordType>, SchemaError> {
    RecordType::builder(PRODUCT)
        .property(Property::string("title"))
        .property(Property::float("price"))
        .property(Property::string("tags").repeated())
        .property(Property::date_time("updated").auto_now())
        .alias(
            AliasProperty::new(alias::ID, |r| r.key().and_then(Key::string_id).map(Value::from))
                .with_setter(|record, value, ctx| {
                    let name = text(alias::ID, &value)?;
                    record.update_from_key(Key::new(PRODUCT, name), ctx.store)
                })
                .with_wire_type(WireType::String)
                .required(),
        )
        .build()
}

fn folder() -> Result<Arc<RecordType>, SchemaError> {
    RecordType::builder(FOLDER)
        .property(Property::date_time("updated").auto_now())
        .alias(
            AliasProperty::new("name", |r| r.key().and_then(Key::string_id).map(Value::from))
                .with_setter(|record, value, ctx| {
                    let name = text("name", &value)?;
                    record.update_from_key(Key::new(FOLDER, name), ctx.store)
                })
                .with_wire_type(WireType::String)
                .required(),
        )
        .message_fields(["name", "updated"])
        .build()
}

/// Files live under a folder; both names are needed to build the key.
fn file() -> Result<Arc<RecordType>, SchemaError> {
    RecordType::builder(FILE)
        .property(Property::string("body"))
        .property(Property::date_time("created").auto_now_add())
        .alias(
            AliasProperty::new("folder", |r| path_name(r, FOLDER_NAME, 0))
                .with_setter(|record, value, ctx| {
                    let name = text("folder", &value)?;
                    let folder_key = Key::new(FOLDER, name.as_str());
                    record.set_transient(FOLDER_NAME, name.as_str());
                    if !ctx.store.exists(&folder_key)? {
                        return Err(ApiError::not_found(format!("Folder {name} does not exist.")));
                    }
                    compose_file_key(record, ctx)?;
                    record.query_info_mut().ancestor = Some(folder_key);
                    Ok(())
                })
                .with_wire_type(WireType::String)
                .required(),
        )
        .alias(
            AliasProperty::new(alias::ID, |r| path_name(r, FILE_NAME, 1))
                .with_setter(|record, value, ctx| {
                    let id = text(alias::ID, &value)?;
                    record.set_transient(FILE_NAME, id);
                    compose_file_key(record, ctx)
                })
                .with_wire_type(WireType::String)
                .required(),
        )
        .build()
}

/// Named sort orders exposed as an enum in place of the raw order string.
#[must_use]
pub fn task_order() -> Arc<EnumType> {
    EnumType::new("TaskOrder", [("BY_TITLE", 1), ("NEWEST_FIRST", 2)])
}

fn task() -> Result<Arc<RecordType>, SchemaError> {
    let order = task_order();
    let lookup = Arc::clone(&order);
    let default = order
        .by_name("BY_TITLE")
        .ok_or_else(|| SchemaError::InvalidDefault {
            field: alias::ORDER.to_owned(),
            expected: "TaskOrder".to_owned(),
        })?;
    RecordType::builder(TASK)
        .property(Property::string("title").required())
        .property(Property::boolean("done").with_default(false))
        .property(Property::user("owner").required())
        .property(Property::date_time("created").auto_now_add())
        .alias(
            AliasProperty::new(alias::ORDER, move |r| {
                let name = match alias::order_get(r)?.as_str()? {
                    "title" => "BY_TITLE",
                    "-created" => "NEWEST_FIRST",
                    _ => return None,
                };
                lookup.by_name(name).map(Value::Enum)
            })
            .with_setter(|record, value, ctx| {
                let order = match value.as_enum().map(|e| e.name.as_str()) {
                    Some("BY_TITLE") => "title",
                    Some("NEWEST_FIRST") => "-created",
                    _ => {
                        return Err(ConversionError::mismatch(alias::ORDER, "TaskOrder", &value).into());
                    }
                };
                alias::order_set(record, Value::from(order), ctx)
            })
            .with_wire_type(WireType::Enum(order))
            .with_default(default),
        )
        .message_fields(["title", "done", "owner", "created"])
        .build()
}

fn score() -> Result<Arc<RecordType>, SchemaError> {
    RecordType::builder(SCORE)
        .property(Property::integer("points").required())
        .property(Property::user("player").current_user(true))
        .property(Property::date_time("played").auto_now_add())
        .build()
}

fn text(field: &str, value: &Value) -> Result<String, ApiError> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ConversionError::mismatch(field, "string", value).into())
}

fn path_name(record: &Record, transient: &str, depth: usize) -> Option<Value> {
    record.transient(transient).cloned().or_else(|| {
        match record.key()?.pairs().get(depth)?.id.clone()? {
            KeyId::Name(name) => Some(Value::from(name)),
            KeyId::Int(_) => None,
        }
    })
}

fn compose_file_key(record: &mut Record, ctx: &SetContext<'_>) -> Result<(), ApiError> {
    let folder = record.transient(FOLDER_NAME).and_then(Value::as_str).map(str::to_owned);
    let name = record.transient(FILE_NAME).and_then(Value::as_str).map(str::to_owned);
    if let (Some(folder), Some(name)) = (folder, name) {
        let key = Key::new(FOLDER, folder).child(FILE, Some(KeyId::from(name)));
        record.update_from_key(key, ctx.store)?;
    }
    Ok(())
}

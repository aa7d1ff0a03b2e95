#![forbid(unsafe_code)]

//! Core: property keys, field-name allocation, and hidden per-object fields.

pub mod fields;
pub mod property_key;

pub use fields::{
    FieldNameMode, HiddenFields, create_field_name, field_name_mode, get_hidden_field,
    has_hidden_field, set_hidden_field,
};
pub use property_key::{ObjectId, PropertyKey, Symbol};

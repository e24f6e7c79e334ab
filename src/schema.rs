use crate::error::{QueryError, Result};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Declared type of a Cargo field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Text,
    Page,
    Wikitext,
    Url,
    Email,
    File,
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
    /// `List (,) of T`
    List(Box<FieldType>),
}

/// Groups of field types that may be compared with each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Text,
    Numeric,
    Boolean,
    Temporal,
    List,
}

impl FieldType {
    pub fn class(&self) -> TypeClass {
        match self {
            FieldType::String
            | FieldType::Text
            | FieldType::Page
            | FieldType::Wikitext
            | FieldType::Url
            | FieldType::Email
            | FieldType::File => TypeClass::Text,
            FieldType::Integer | FieldType::Float => TypeClass::Numeric,
            FieldType::Boolean => TypeClass::Boolean,
            FieldType::Date | FieldType::Datetime => TypeClass::Temporal,
            FieldType::List(_) => TypeClass::List,
        }
    }

    pub fn is_text(&self) -> bool {
        self.class() == TypeClass::Text
    }

    pub fn is_numeric(&self) -> bool {
        self.class() == TypeClass::Numeric
    }

    /// Whether a value of this type can be compared against `other`.
    pub fn is_comparable_with(&self, other: &FieldType) -> bool {
        self.class() == other.class()
    }

    /// Item type of a list field
    pub fn item_type(&self) -> Option<&FieldType> {
        match self {
            FieldType::List(item) => Some(item),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Text => write!(f, "Text"),
            FieldType::Page => write!(f, "Page"),
            FieldType::Wikitext => write!(f, "Wikitext"),
            FieldType::Url => write!(f, "URL"),
            FieldType::Email => write!(f, "Email"),
            FieldType::File => write!(f, "File"),
            FieldType::Integer => write!(f, "Integer"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Boolean => write!(f, "Boolean"),
            FieldType::Date => write!(f, "Date"),
            FieldType::Datetime => write!(f, "Datetime"),
            FieldType::List(item) => write!(f, "List (,) of {}", item),
        }
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// Declared link from one model to another, used for implicit joins
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub target: TypeId,
    pub local_field: String,
    pub foreign_field: String,
}

/// Table metadata for one registered type
#[derive(Debug, Clone)]
pub struct CargoModel {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub builtins: Vec<FieldDef>,
    pub relations: Vec<Relation>,
}

impl CargoModel {
    /// Look up a declared or built-in field.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .chain(self.builtins.iter())
            .find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Implemented by the schema-declaration layer for each table type.
pub trait CargoTable: 'static {
    const TABLE: &'static str;

    /// `(name, type, nullable)` for every declared field, in order
    fn fields() -> Vec<(&'static str, FieldType, bool)>;
}

/// Columns Cargo adds to every table
fn builtin_fields() -> Vec<FieldDef> {
    [
        ("_pageName", FieldType::Page),
        ("_pageTitle", FieldType::String),
        ("_pageNamespace", FieldType::Integer),
        ("_pageID", FieldType::Integer),
        ("_ID", FieldType::Integer),
    ]
    .into_iter()
    .map(|(name, field_type)| FieldDef {
        name: name.to_string(),
        field_type,
        nullable: false,
    })
    .collect()
}

struct PendingRelation {
    source: TypeId,
    name: String,
    target: TypeId,
    target_name: &'static str,
    local_field: String,
    foreign_field: String,
}

/// Collects table declarations before translation starts.
pub struct RegistryBuilder {
    models: HashMap<TypeId, CargoModel>,
    table_names: HashMap<String, TypeId>,
    relations: Vec<PendingRelation>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            table_names: HashMap::new(),
            relations: Vec::new(),
        }
    }

    /// Register a table type
    pub fn register<T>(
        &mut self,
        table: &str,
        fields: Vec<(&str, FieldType, bool)>,
    ) -> Result<&mut Self>
    where
        T: 'static,
    {
        let type_id = TypeId::of::<T>();

        if self.models.contains_key(&type_id) {
            return Err(QueryError::Schema(format!(
                "Type {} already registered",
                type_name::<T>()
            )));
        }
        if self.table_names.contains_key(table) {
            return Err(QueryError::Schema(format!(
                "Table {} already registered",
                table
            )));
        }

        let builtins = builtin_fields();
        let mut columns: Vec<FieldDef> = Vec::with_capacity(fields.len());
        for (field_name, field_type, nullable) in fields {
            if columns.iter().chain(builtins.iter()).any(|c| c.name == field_name) {
                return Err(QueryError::Schema(format!(
                    "Field {}.{} declared twice",
                    table, field_name
                )));
            }
            columns.push(FieldDef {
                name: field_name.to_string(),
                field_type,
                nullable,
            });
        }

        let model = CargoModel {
            type_id,
            type_name: type_name::<T>(),
            name: table.to_string(),
            fields: columns,
            builtins,
            relations: Vec::new(),
        };

        self.table_names.insert(table.to_string(), type_id);
        self.models.insert(type_id, model);

        Ok(self)
    }

    /// Register a type that declares its own schema
    pub fn register_table<T: CargoTable>(&mut self) -> Result<&mut Self> {
        self.register::<T>(T::TABLE, T::fields())
    }

    /// Declare that `S.local` refers to `D.foreign`, navigable as `S.name`.
    /// Checked when the registry is built.
    pub fn relation<S, D>(&mut self, name: &str, local: &str, foreign: &str) -> &mut Self
    where
        S: 'static,
        D: 'static,
    {
        self.relations.push(PendingRelation {
            source: TypeId::of::<S>(),
            name: name.to_string(),
            target: TypeId::of::<D>(),
            target_name: type_name::<D>(),
            local_field: local.to_string(),
            foreign_field: foreign.to_string(),
        });
        self
    }

    /// Validate relations and freeze the registry.
    pub fn build(mut self) -> Result<TableRegistry> {
        for pending in std::mem::take(&mut self.relations) {
            let target = self
                .models
                .get(&pending.target)
                .ok_or_else(|| QueryError::UnknownTable(pending.target_name.to_string()))?;
            let foreign = target
                .field(&pending.foreign_field)
                .ok_or_else(|| {
                    QueryError::UnknownField(format!("{}.{}", target.name, pending.foreign_field))
                })?
                .field_type
                .clone();

            let source = self
                .models
                .get_mut(&pending.source)
                .ok_or_else(|| QueryError::UnknownTable(format!("{:?}", pending.source)))?;
            let local = source.field(&pending.local_field).ok_or_else(|| {
                QueryError::UnknownField(format!("{}.{}", source.name, pending.local_field))
            })?;

            if !local.field_type.is_comparable_with(&foreign) {
                return Err(QueryError::TypeMismatch(format!(
                    "relation {}.{}: {} is {} but the target key is {}",
                    source.name, pending.name, pending.local_field, local.field_type, foreign
                )));
            }
            if source.field(&pending.name).is_some() || source.relation(&pending.name).is_some() {
                return Err(QueryError::Schema(format!(
                    "Relation {}.{} shadows an existing member",
                    source.name, pending.name
                )));
            }

            source.relations.push(Relation {
                name: pending.name,
                target: pending.target,
                local_field: pending.local_field,
                foreign_field: pending.foreign_field,
            });
        }

        Ok(TableRegistry {
            models: self.models,
            table_names: self.table_names,
        })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only table metadata shared by every translation
#[derive(Debug, Clone)]
pub struct TableRegistry {
    models: HashMap<TypeId, CargoModel>,
    table_names: HashMap<String, TypeId>,
}

impl TableRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Get the model registered for `T`
    pub fn model<T: 'static>(&self) -> Result<&CargoModel> {
        self.models
            .get(&TypeId::of::<T>())
            .ok_or_else(|| QueryError::UnknownTable(type_name::<T>().to_string()))
    }

    pub fn model_by_id(&self, type_id: &TypeId) -> Result<&CargoModel> {
        self.models
            .get(type_id)
            .ok_or_else(|| QueryError::UnknownTable(format!("{:?}", type_id)))
    }

    /// Get a model by its Cargo table name
    pub fn model_by_name(&self, name: &str) -> Result<&CargoModel> {
        self.table_names
            .get(name)
            .and_then(|type_id| self.models.get(type_id))
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    /// List all registered table names
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table_names.keys().cloned().collect();
        names.sort();
        names
    }
}

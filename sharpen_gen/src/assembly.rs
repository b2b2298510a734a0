use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::{
    error::GenerateError,
    managed_type::ManagedType,
    meta_info::{Attribute, FieldInfo, MethodInfo, ParamInfo, TypeInfo},
    metadata::{
        ClassLayoutRow, Metadata, MetadataError, Result, TableId, Token,
        attributes::AttributeArguments,
        signature::{self, MethodSignature},
    },
};

/// A managed module opened for export generation.
///
/// The type list, nesting, class layouts and custom attributes are indexed
/// once on open; everything else is read from the image on demand.
#[derive(Debug)]
pub struct ManagedModule {
    name: String,
    path: Option<PathBuf>,
    metadata: Metadata,
    types: Vec<TypeInfo>,
    attributes: FxHashMap<Token, Vec<Attribute>>,
    layouts: FxHashMap<u32, ClassLayoutRow>,
}

impl ManagedModule {
    /// ## Functionality
    /// Reads and indexes the module at `path`.
    ///
    /// The module name is the `Assembly` row's name, or the file stem when the
    /// image has no assembly manifest.
    pub fn open(path: &Path) -> Result<Self, GenerateError> {
        let bytes = std::fs::read(path).map_err(|source| GenerateError::Read {
            path: path.to_owned(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut module =
            Self::from_bytes(&stem, bytes).map_err(|source| GenerateError::Metadata {
                path: path.to_owned(),
                source,
            })?;
        module.path = Some(path.to_owned());
        Ok(module)
    }

    pub fn from_bytes(fallback_name: &str, bytes: Vec<u8>) -> Result<Self> {
        let metadata = Metadata::parse(bytes)?;

        let name = match metadata.assembly()? {
            Some(row) => metadata.string(row.name)?.to_owned(),
            None => fallback_name.to_owned(),
        };

        let mut enclosing = FxHashMap::default();
        for row in 1..=metadata.row_count(TableId::NestedClass) {
            let nested = metadata.nested_class(row)?;
            enclosing.insert(nested.nested, nested.enclosing);
        }

        let mut layouts = FxHashMap::default();
        for row in 1..=metadata.row_count(TableId::ClassLayout) {
            let layout = metadata.class_layout(row)?;
            layouts.insert(layout.parent, layout);
        }

        let mut module = Self {
            name,
            path: None,
            metadata,
            types: Vec::new(),
            attributes: FxHashMap::default(),
            layouts,
        };

        let mut types = Vec::with_capacity(module.metadata.row_count(TableId::TypeDef) as usize);
        for row in 1..=module.metadata.row_count(TableId::TypeDef) {
            let def = module.metadata.type_def(row)?;
            let base = match def.extends {
                Some(token) if token.table != TableId::TypeSpec => Some(module.type_name(token)?),
                _ => None,
            };
            types.push(TypeInfo {
                token: Token::new(TableId::TypeDef, row),
                namespace: module.metadata.string(def.namespace)?.to_owned(),
                name: module.metadata.string(def.name)?.to_owned(),
                flags: def.flags,
                base,
                enclosing: enclosing.get(&row).copied(),
                fields: module
                    .metadata
                    .list_range(TableId::TypeDef, row, 4, TableId::Field)?,
                methods: module
                    .metadata
                    .list_range(TableId::TypeDef, row, 5, TableId::MethodDef)?,
            });
        }
        module.types = types;

        for row in 1..=module.metadata.row_count(TableId::CustomAttribute) {
            let raw = module.metadata.custom_attribute(row)?;
            let (Some(parent), Some(constructor)) = (raw.parent, raw.constructor) else {
                continue;
            };
            let Some((namespace, name)) = module.constructor_owner(constructor)? else {
                continue;
            };
            module.attributes.entry(parent).or_default().push(Attribute {
                parent,
                constructor,
                namespace,
                name,
                value: raw.value,
            });
        }

        tracing::debug!(
            module = %module.name,
            types = module.types.len(),
            attributes = module.attributes.values().map(Vec::len).sum::<usize>(),
            "indexed managed module"
        );

        Ok(module)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Every type definition in table order, `<Module>` included.
    pub fn types(&self) -> &[TypeInfo] {
        &self.types
    }

    pub fn type_def(&self, row: u32) -> Option<&TypeInfo> {
        row.checked_sub(1).and_then(|i| self.types.get(i as usize))
    }

    /// The type nested directly inside `enclosing` called `name`.
    pub fn nested_type(&self, enclosing: &TypeInfo, name: &str) -> Option<&TypeInfo> {
        self.types
            .iter()
            .find(|ty| ty.enclosing == Some(enclosing.token.row) && ty.name == name)
    }

    /// Runtime-style name: `Ns.Outer+Inner`.
    pub fn runtime_type_name(&self, ty: &TypeInfo) -> String {
        match ty.enclosing.and_then(|row| self.type_def(row)) {
            Some(outer) => format!("{}+{}", self.runtime_type_name(outer), ty.name),
            None => ty.qualified_name(),
        }
    }

    pub fn class_layout(&self, ty: &TypeInfo) -> Option<&ClassLayoutRow> {
        self.layouts.get(&ty.token.row)
    }

    pub fn get_methods(&self, ty: &TypeInfo) -> Result<Vec<MethodInfo>> {
        ty.methods
            .clone()
            .map(|row| {
                let def = self.metadata.method_def(row)?;
                let params = self
                    .metadata
                    .list_range(TableId::MethodDef, row, 5, TableId::Param)?;
                Ok(MethodInfo {
                    token: Token::new(TableId::MethodDef, row),
                    name: self.metadata.string(def.name)?.to_owned(),
                    flags: def.flags,
                    signature: def.signature,
                    params,
                })
            })
            .collect()
    }

    pub fn get_method_signature(&self, method: &MethodInfo) -> Result<MethodSignature> {
        MethodSignature::parse(self.metadata.blob(method.signature)?)
    }

    pub fn get_params(&self, method: &MethodInfo) -> Result<Vec<ParamInfo>> {
        method
            .params
            .clone()
            .map(|row| {
                let param = self.metadata.param(row)?;
                Ok(ParamInfo {
                    token: Token::new(TableId::Param, row),
                    sequence: param.sequence,
                    name: self.metadata.string(param.name)?.to_owned(),
                })
            })
            .collect()
    }

    pub fn get_fields(&self, ty: &TypeInfo) -> Result<Vec<FieldInfo>> {
        ty.fields
            .clone()
            .map(|row| {
                let field = self.metadata.field(row)?;
                Ok(FieldInfo {
                    token: Token::new(TableId::Field, row),
                    name: self.metadata.string(field.name)?.to_owned(),
                    flags: field.flags,
                    signature: field.signature,
                })
            })
            .collect()
    }

    pub fn get_field_type(&self, field: &FieldInfo) -> Result<ManagedType> {
        signature::parse_field(self.metadata.blob(field.signature)?)
    }

    /// Custom attributes attached to `parent`, in table order.
    pub fn get_attributes(&self, parent: Token) -> &[Attribute] {
        self.attributes.get(&parent).map_or(&[], Vec::as_slice)
    }

    /// Attributes on the assembly manifest row.
    pub fn assembly_attributes(&self) -> &[Attribute] {
        self.get_attributes(Token::new(TableId::Assembly, 1))
    }

    pub fn get_attribute_arguments(&self, attribute: &Attribute) -> Result<AttributeArguments> {
        let signature = match attribute.constructor.table {
            TableId::MethodDef => self.metadata.method_def(attribute.constructor.row)?.signature,
            TableId::MemberRef => self.metadata.member_ref(attribute.constructor.row)?.signature,
            _ => {
                return Err(MetadataError::BadIndex {
                    what: "attribute constructor",
                    index: attribute.constructor.row,
                });
            }
        };
        let constructor = MethodSignature::parse(self.metadata.blob(signature)?)?;
        AttributeArguments::parse(self.metadata.blob(attribute.value)?, &constructor.params)
    }

    /// Name of a TypeDef or TypeRef; nested types are joined with `+`.
    pub fn type_name(&self, token: Token) -> Result<String> {
        match token.table {
            TableId::TypeDef => {
                if let Some(ty) = self.type_def(token.row) {
                    return Ok(self.runtime_type_name(ty));
                }
                // Still indexing: read the row directly.
                let def = self.metadata.type_def(token.row)?;
                Ok(join_name(
                    self.metadata.string(def.namespace)?,
                    self.metadata.string(def.name)?,
                ))
            }
            TableId::TypeRef => {
                let r = self.metadata.type_ref(token.row)?;
                let name = self.metadata.string(r.name)?;
                match r.scope {
                    Some(scope) if scope.table == TableId::TypeRef => {
                        Ok(format!("{}+{}", self.type_name(scope)?, name))
                    }
                    _ => Ok(join_name(self.metadata.string(r.namespace)?, name)),
                }
            }
            TableId::TypeSpec => {
                let blob = self.metadata.blob(self.metadata.type_spec_signature(token.row)?)?;
                Ok(self.describe(&signature::parse_type_spec(blob)?))
            }
            _ => Err(MetadataError::BadIndex {
                what: "type token",
                index: token.row,
            }),
        }
    }

    /// Human readable rendering of a signature type with names resolved.
    pub fn describe(&self, ty: &ManagedType) -> String {
        let named = |token: Token| {
            self.type_name(token)
                .unwrap_or_else(|_| format!("{:?}#{}", token.table, token.row))
        };
        match ty {
            ManagedType::ValueType(token) | ManagedType::Class(token) => named(*token),
            ManagedType::Pointer(inner) => format!("{}*", self.describe(inner)),
            ManagedType::ByRef(inner) => format!("ref {}", self.describe(inner)),
            ManagedType::SzArray(inner) => format!("{}[]", self.describe(inner)),
            ManagedType::GenericInstance { base, arguments } => {
                let arguments: Vec<String> = arguments.iter().map(|a| self.describe(a)).collect();
                format!("{}<{}>", named(*base), arguments.join(", "))
            }
            other => other.to_string(),
        }
    }

    /// Namespace and name of the type declaring an attribute constructor.
    fn constructor_owner(&self, constructor: Token) -> Result<Option<(String, String)>> {
        let owner = match constructor.table {
            TableId::MethodDef => {
                let mut owner = None;
                for row in 1..=self.metadata.row_count(TableId::TypeDef) {
                    let range = self
                        .metadata
                        .list_range(TableId::TypeDef, row, 5, TableId::MethodDef)?;
                    if range.contains(&constructor.row) {
                        owner = Some(Token::new(TableId::TypeDef, row));
                        break;
                    }
                }
                owner
            }
            TableId::MemberRef => self.metadata.member_ref(constructor.row)?.parent,
            _ => None,
        };

        let Some(owner) = owner else {
            return Ok(None);
        };
        let (namespace, name) = match owner.table {
            TableId::TypeDef => {
                let def = self.metadata.type_def(owner.row)?;
                (def.namespace, def.name)
            }
            TableId::TypeRef => {
                let r = self.metadata.type_ref(owner.row)?;
                (r.namespace, r.name)
            }
            _ => return Ok(None),
        };
        Ok(Some((
            self.metadata.string(namespace)?.to_owned(),
            self.metadata.string(name)?.to_owned(),
        )))
    }
}

fn join_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_owned()
    } else {
        format!("{namespace}.{name}")
    }
}

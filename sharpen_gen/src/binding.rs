//! Maps managed parameter and return types to native type expressions.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    assembly::ManagedModule,
    managed_type::ManagedType,
    meta_info::{TypeInfo, TypeLayout},
    metadata::{MetadataError, TableId},
    scanner::{ExportDescriptor, is_c_identifier},
};

/// A native type expression plus whatever C it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeBinding {
    pub type_expr: String,
    /// Verbatim C fragments, dependencies first.
    pub decl_code: Vec<String>,
    pub includes: Vec<String>,
}

impl TypeBinding {
    fn plain(type_expr: impl Into<String>) -> Self {
        Self {
            type_expr: type_expr.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    pub name: String,
    pub binding: TypeBinding,
}

/// An export with every position bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBinding {
    pub export: ExportDescriptor,
    pub parameters: Vec<ParameterBinding>,
    pub return_value: TypeBinding,
}

impl ExportBinding {
    /// Include directives the export needs, in order.
    pub fn includes(&self) -> impl Iterator<Item = &str> {
        self.export
            .includes
            .iter()
            .chain(self.parameters.iter().flat_map(|p| p.binding.includes.iter()))
            .chain(self.return_value.includes.iter())
            .map(String::as_str)
    }

    /// Declaration code in emission order: the export's own `C99DeclCode`,
    /// then each parameter's, then the return value's.
    pub fn declarations(&self) -> impl Iterator<Item = &str> {
        self.export
            .decl_code
            .iter()
            .chain(self.parameters.iter().flat_map(|p| p.binding.decl_code.iter()))
            .chain(self.return_value.decl_code.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("{position}: {managed} cannot be passed to native code: {reason}")]
    Unbindable {
        position: String,
        managed: String,
        reason: String,
    },
    #[error("{position}: {source}")]
    Metadata {
        position: String,
        #[source]
        source: MetadataError,
    },
}

/// Why a managed type has no native form.
#[derive(Debug)]
enum Refusal {
    Reason(String),
    Metadata(MetadataError),
}

impl From<MetadataError> for Refusal {
    fn from(err: MetadataError) -> Self {
        Refusal::Metadata(err)
    }
}

fn refuse<T>(reason: impl Into<String>) -> Result<T, Refusal> {
    Err(Refusal::Reason(reason.into()))
}

/// Derived struct declarations are cached across exports; a struct whose
/// fields are being resolved is tracked so self-references through pointers
/// terminate.
pub struct TypeResolver<'m> {
    module: &'m ManagedModule,
    structs: FxHashMap<u32, TypeBinding>,
    in_progress: FxHashSet<u32>,
}

impl<'m> TypeResolver<'m> {
    pub fn new(module: &'m ManagedModule) -> Self {
        Self {
            module,
            structs: FxHashMap::default(),
            in_progress: FxHashSet::default(),
        }
    }

    pub fn bind_export(&mut self, export: &ExportDescriptor) -> Result<ExportBinding, BindingError> {
        let parameters = export
            .parameters
            .iter()
            .map(|param| {
                let position = format!("parameter `{}`", param.name);
                let binding =
                    self.bind(&param.managed_type, param.c99_type.as_deref(), &position)?;
                Ok(ParameterBinding {
                    name: param.name.clone(),
                    binding,
                })
            })
            .collect::<Result<Vec<_>, BindingError>>()?;

        let return_value = self.bind(
            &export.return_type,
            export.return_c99_type.as_deref(),
            "return value",
        )?;

        Ok(ExportBinding {
            export: export.clone(),
            parameters,
            return_value,
        })
    }

    /// An explicit override always wins; otherwise only blittable types bind.
    pub fn bind(
        &mut self,
        ty: &ManagedType,
        c99_type: Option<&str>,
        position: &str,
    ) -> Result<TypeBinding, BindingError> {
        if let Some(expr) = c99_type {
            return Ok(TypeBinding::plain(expr.trim()));
        }

        let mut decl_code = Vec::new();
        match self.native(ty, &mut decl_code) {
            Ok(type_expr) => Ok(TypeBinding {
                type_expr,
                decl_code,
                includes: Vec::new(),
            }),
            Err(Refusal::Reason(reason)) => Err(BindingError::Unbindable {
                position: position.to_owned(),
                managed: self.module.describe(ty),
                reason,
            }),
            Err(Refusal::Metadata(source)) => Err(BindingError::Metadata {
                position: position.to_owned(),
                source,
            }),
        }
    }

    fn native(&mut self, ty: &ManagedType, decl_code: &mut Vec<String>) -> Result<String, Refusal> {
        if let Some(primitive) = ty.c99_primitive() {
            return Ok(primitive.to_owned());
        }
        match ty {
            ManagedType::Bool => {
                refuse("bool has no fixed native size; annotate it with C99Type")
            }
            ManagedType::String | ManagedType::Object | ManagedType::Class(_) => {
                refuse("reference types are not blittable")
            }
            ManagedType::SzArray(_) | ManagedType::Array { .. } => {
                refuse("arrays are not blittable; pass a pointer instead")
            }
            ManagedType::ByRef(_) => refuse("by-reference passing is not supported; use a pointer"),
            ManagedType::TypedReference => refuse("TypedReference is not blittable"),
            ManagedType::GenericInstance { .. }
            | ManagedType::GenericParam(_)
            | ManagedType::MethodGenericParam(_) => refuse("generic types are not blittable"),
            ManagedType::FunctionPointer => Ok("void*".to_owned()),
            ManagedType::Pointer(pointee) => {
                if let ManagedType::ValueType(token) = pointee.as_ref() {
                    if token.table == TableId::TypeDef && self.in_progress.contains(&token.row) {
                        let module = self.module;
                        if let Some(ty) = module.type_def(token.row) {
                            return Ok(format!("{}*", self.struct_name(ty)));
                        }
                    }
                }
                Ok(format!("{}*", self.native(pointee, decl_code)?))
            }
            ManagedType::ValueType(token) => {
                if token.table != TableId::TypeDef {
                    return refuse("value types from other modules have no known layout");
                }
                let module = self.module;
                let Some(ty) = module.type_def(token.row) else {
                    return Err(Refusal::Metadata(MetadataError::BadIndex {
                        what: "value type",
                        index: token.row,
                    }));
                };
                if ty.is_enum() {
                    return self.enum_underlying(ty);
                }
                let binding = self.struct_binding(ty)?;
                decl_code.extend(binding.decl_code);
                Ok(binding.type_expr)
            }
            _ => refuse("no native equivalent"),
        }
    }

    fn enum_underlying(&self, ty: &TypeInfo) -> Result<String, Refusal> {
        let fields = self.module.get_fields(ty)?;
        let Some(value) = fields
            .iter()
            .find(|field| field.is_instance() && field.name == "value__")
        else {
            return refuse("enum has no value__ field");
        };
        let underlying = self.module.get_field_type(value)?;
        match underlying.c99_primitive() {
            Some(expr) if underlying != ManagedType::Void => Ok(expr.to_owned()),
            _ => refuse("enum has a non-integral underlying type"),
        }
    }

    fn struct_binding(&mut self, ty: &TypeInfo) -> Result<TypeBinding, Refusal> {
        let row = ty.token.row;
        if let Some(cached) = self.structs.get(&row) {
            return Ok(cached.clone());
        }
        if !ty.is_value_type() {
            return refuse("not a value type");
        }
        if self.in_progress.contains(&row) {
            return refuse("struct contains itself by value");
        }
        match ty.layout() {
            TypeLayout::Sequential => {}
            TypeLayout::Auto => return refuse("auto layout structs have no stable native layout"),
            TypeLayout::Explicit => return refuse("explicit layout structs are not derived"),
        }
        if let Some(layout) = self.module.class_layout(ty) {
            if layout.packing != 0 || layout.size != 0 {
                return refuse("structs with explicit packing or size are not derived");
            }
        }

        self.in_progress.insert(row);
        let result = self.derive_struct(ty);
        self.in_progress.remove(&row);

        let binding = result?;
        tracing::debug!(r#struct = %binding.type_expr, "derived native struct");
        self.structs.insert(row, binding.clone());
        Ok(binding)
    }

    fn derive_struct(&mut self, ty: &TypeInfo) -> Result<TypeBinding, Refusal> {
        let name = self.struct_name(ty);
        let mut decl_code = Vec::new();
        let mut body = String::new();
        let mut members = 0;

        for field in self.module.get_fields(ty)? {
            if !field.is_instance() {
                continue;
            }
            let field_type = self.module.get_field_type(&field)?;
            let expr = match self.native(&field_type, &mut decl_code) {
                Ok(expr) => expr,
                Err(Refusal::Reason(reason)) => {
                    return refuse(format!(
                        "field `{}` ({}): {reason}",
                        field.name,
                        self.module.describe(&field_type)
                    ));
                }
                Err(err) => return Err(err),
            };
            if !is_c_identifier(&field.name) {
                return refuse(format!("field `{}` is not a valid C identifier", field.name));
            }
            body.push_str(&format!("    {expr} {};\n", field.name));
            members += 1;
        }

        if members == 0 {
            return refuse("empty structs have no C equivalent");
        }

        decl_code.push(format!("{name} {{\n{body}}};"));
        Ok(TypeBinding {
            type_expr: name,
            decl_code,
            includes: Vec::new(),
        })
    }

    /// `struct Ns_Outer_Name`.
    fn struct_name(&self, ty: &TypeInfo) -> String {
        let name = self.module.runtime_type_name(ty);
        let tag: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("struct {tag}")
    }
}

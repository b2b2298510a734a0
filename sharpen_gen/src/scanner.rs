//! Finds exported methods and reads their export annotations.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    assembly::ManagedModule,
    error::Diagnostics,
    managed_type::ManagedType,
    meta_info::{Attribute, MethodInfo, TypeInfo},
    metadata::{
        MetadataError, Token,
        attributes::{AttributeArguments, AttributeValue},
    },
};

pub const UNMANAGED_CALLERS_ONLY: &str =
    "System.Runtime.InteropServices.UnmanagedCallersOnlyAttribute";
pub const EXPORT: &str = "Sharpen.ExportAttribute";
pub const C99_TYPE: &str = "Sharpen.C99TypeAttribute";
pub const C99_DECL_CODE: &str = "Sharpen.C99DeclCodeAttribute";
pub const C99_INCLUDE: &str = "Sharpen.C99IncludeAttribute";

/// Names the generated code defines itself.
const RESERVED_NAMES: &[&str] = &["set_failure_callback", "preload_runtime"];

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "_Complex", "_Imaginary",
];

/// Whether `name` can be used verbatim as a C identifier.
pub fn is_c_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !C_KEYWORDS.contains(&name)
}

/// Names the generated C or the standard headers it includes may already use:
/// the `sharpen_`/`SHARPEN_` namespaces, `_t` typedefs and common macros.
fn collides_with_generated_code(name: &str) -> bool {
    name.starts_with("sharpen_")
        || name.starts_with("SHARPEN_")
        || name.ends_with("_t")
        || matches!(name, "NULL" | "offsetof" | "bool" | "true" | "false")
}

/// Whether `name` can be declared in generated C without clashing with
/// anything the header or stubs define.
pub fn is_free_c_name(name: &str) -> bool {
    is_c_identifier(name) && !collides_with_generated_code(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallingConvention {
    /// Platform default (`__stdcall` on Windows, the C convention elsewhere).
    Default,
    Cdecl,
    Stdcall,
    Thiscall,
    Fastcall,
}

impl CallingConvention {
    /// Parses a `CallConvs` entry such as
    /// `System.Runtime.CompilerServices.CallConvCdecl, System.Runtime`.
    fn from_type_name(name: &str) -> Option<Self> {
        let name = name.split(',').next().unwrap_or(name).trim();
        let short = name.rsplit('.').next().unwrap_or(name);
        match short {
            "CallConvCdecl" => Some(CallingConvention::Cdecl),
            "CallConvStdcall" => Some(CallingConvention::Stdcall),
            "CallConvThiscall" => Some(CallingConvention::Thiscall),
            "CallConvFastcall" => Some(CallingConvention::Fastcall),
            _ => None,
        }
    }

    pub fn macro_name(self) -> &'static str {
        match self {
            CallingConvention::Default => "SHARPEN_CALLTYPE",
            CallingConvention::Cdecl => "SHARPEN_CALLTYPE_CDECL",
            CallingConvention::Stdcall => "SHARPEN_CALLTYPE_STDCALL",
            CallingConvention::Thiscall => "SHARPEN_CALLTYPE_THISCALL",
            CallingConvention::Fastcall => "SHARPEN_CALLTYPE_FASTCALL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportKind {
    /// Resolved with `load_assembly_and_get_function_with_unmanaged_callers_only`.
    UnmanagedCallersOnly,
    /// Resolved through a delegate type, given as an assembly-qualified name.
    Delegate { delegate_type: String },
}

/// Recognised export annotations, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMatcher {
    UnmanagedCallersOnly,
    Export,
}

impl ExportMatcher {
    pub const ALL: [ExportMatcher; 2] = [ExportMatcher::UnmanagedCallersOnly, ExportMatcher::Export];

    pub fn attribute_name(self) -> &'static str {
        match self {
            ExportMatcher::UnmanagedCallersOnly => UNMANAGED_CALLERS_ONLY,
            ExportMatcher::Export => EXPORT,
        }
    }

    /// First annotation on `attributes` matched by the highest priority matcher.
    pub fn find(attributes: &[Attribute]) -> Option<(ExportMatcher, &Attribute)> {
        Self::ALL.into_iter().find_map(|matcher| {
            attributes
                .iter()
                .find(|attr| attr.is(matcher.attribute_name()))
                .map(|attr| (matcher, attr))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub managed_type: ManagedType,
    /// Native type from a `C99Type` annotation.
    pub c99_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDescriptor {
    pub method: Token,
    /// Namespace-qualified declaring type, e.g. `Example.Managed.Exports`.
    pub type_name: String,
    pub method_name: String,
    pub entry_point: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub return_type: ManagedType,
    pub return_c99_type: Option<String>,
    pub calling_convention: CallingConvention,
    pub kind: ExportKind,
    /// `C99DeclCode` fragments, in annotation order.
    pub decl_code: Vec<String>,
    /// `C99Include` entries on the method, in annotation order.
    pub includes: Vec<String>,
}

impl ExportDescriptor {
    /// `Ns.Type, Assembly` as the runtime expects it.
    pub fn assembly_qualified_type(&self, module_name: &str) -> String {
        format!("{}, {}", self.type_name, module_name)
    }

    pub fn delegate_type(&self) -> Option<&str> {
        match &self.kind {
            ExportKind::UnmanagedCallersOnly => None,
            ExportKind::Delegate { delegate_type } => Some(delegate_type),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub exports: Vec<ExportDescriptor>,
    /// `C99Include` entries on the assembly itself.
    pub includes: Vec<String>,
    pub diagnostics: Diagnostics,
}

/// Why an annotated method was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("{method} must be static to be exported")]
    NotStatic { method: String },
    #[error("{method} must be public to be exported")]
    NotPublic { method: String },
    #[error("{method} is generic and cannot be exported")]
    Generic { method: String },
    #[error("entry point `{entry_point}` is not a valid C identifier")]
    InvalidEntryPoint { entry_point: String },
    #[error("entry point `{entry_point}` is reserved by the generated code")]
    ReservedEntryPoint { entry_point: String },
    #[error("entry point `{entry_point}` is already exported by {previous}")]
    DuplicateEntryPoint {
        entry_point: String,
        previous: String,
    },
    #[error("malformed {attribute} on {method}: {detail}")]
    MalformedAttribute {
        attribute: &'static str,
        method: String,
        detail: String,
    },
    #[error("unreadable signature of {method}: {source}")]
    Signature {
        method: String,
        #[source]
        source: MetadataError,
    },
}

/// ## Functionality
/// Collects every annotated public static method of a non-nested type.
///
/// Per-export problems end up in [`ScanOutput::diagnostics`] and the export is
/// skipped; only unreadable metadata fails the scan.
pub fn scan(module: &ManagedModule) -> Result<ScanOutput, MetadataError> {
    let mut output = ScanOutput::default();
    let mut seen: FxHashMap<String, String> = FxHashMap::default();

    for attr in module.assembly_attributes() {
        if attr.is(C99_INCLUDE) {
            match string_argument(module, attr, C99_INCLUDE, "assembly") {
                Ok(include) => output.includes.push(include),
                Err(err) => output.diagnostics.error(None, err.to_string()),
            }
        }
    }

    for ty in module.types() {
        if ty.name == "<Module>" {
            continue;
        }
        for method in module.get_methods(ty)? {
            let Some((matcher, attribute)) =
                ExportMatcher::find(module.get_attributes(method.token))
            else {
                continue;
            };
            let qualified = format!("{}.{}", module.runtime_type_name(ty), method.name);

            if ty.is_nested() {
                output.diagnostics.warning(
                    Some(&qualified),
                    format!("{} is declared on a nested type and is ignored", matcher.attribute_name()),
                );
                continue;
            }

            match describe_export(module, ty, &method, matcher, attribute, &mut output.diagnostics) {
                Ok(export) => {
                    if let Some(previous) = seen.get(&export.entry_point) {
                        let err = ScanError::DuplicateEntryPoint {
                            entry_point: export.entry_point.clone(),
                            previous: previous.clone(),
                        };
                        output.diagnostics.error(Some(&qualified), err.to_string());
                        continue;
                    }
                    tracing::debug!(
                        entry_point = %export.entry_point,
                        method = %qualified,
                        kind = ?matcher,
                        "found export"
                    );
                    seen.insert(export.entry_point.clone(), qualified);
                    output.exports.push(export);
                }
                Err(err) => output.diagnostics.error(Some(&qualified), err.to_string()),
            }
        }
    }

    Ok(output)
}

fn describe_export(
    module: &ManagedModule,
    ty: &TypeInfo,
    method: &MethodInfo,
    matcher: ExportMatcher,
    attribute: &Attribute,
    diagnostics: &mut Diagnostics,
) -> Result<ExportDescriptor, ScanError> {
    let qualified = format!("{}.{}", ty.qualified_name(), method.name);
    if !method.is_static() {
        return Err(ScanError::NotStatic { method: qualified });
    }
    if !method.is_public() {
        return Err(ScanError::NotPublic { method: qualified });
    }

    let arguments = arguments(module, attribute, matcher.attribute_name(), &qualified)?;
    let entry_point = match arguments.named("EntryPoint") {
        Some(AttributeValue::String(Some(name))) => name.clone(),
        Some(AttributeValue::String(None)) | None => method.name.clone(),
        Some(other) => {
            return Err(ScanError::MalformedAttribute {
                attribute: matcher.attribute_name(),
                method: qualified,
                detail: format!("EntryPoint must be a string, found {other:?}"),
            });
        }
    };
    if !is_c_identifier(&entry_point) {
        return Err(ScanError::InvalidEntryPoint { entry_point });
    }
    if RESERVED_NAMES.contains(&entry_point.as_str())
        || collides_with_generated_code(&entry_point)
    {
        return Err(ScanError::ReservedEntryPoint { entry_point });
    }

    let calling_convention = match arguments.named("CallConvs") {
        Some(AttributeValue::Array(Some(items))) => items
            .iter()
            .find_map(|item| match item {
                AttributeValue::Type(Some(name)) => CallingConvention::from_type_name(name),
                _ => None,
            })
            .unwrap_or(CallingConvention::Default),
        _ => CallingConvention::Default,
    };

    let kind = match matcher {
        ExportMatcher::UnmanagedCallersOnly => ExportKind::UnmanagedCallersOnly,
        ExportMatcher::Export => {
            let delegate_name = format!("{}Delegate", method.name);
            if module.nested_type(ty, &delegate_name).is_none() {
                diagnostics.warning(
                    Some(&entry_point),
                    format!(
                        "delegate type {}+{delegate_name} was not found; dispatch will fail at run time",
                        ty.qualified_name()
                    ),
                );
            }
            ExportKind::Delegate {
                delegate_type: format!(
                    "{}+{delegate_name}, {}",
                    ty.qualified_name(),
                    module.name()
                ),
            }
        }
    };

    let signature = module
        .get_method_signature(method)
        .map_err(|source| ScanError::Signature {
            method: qualified.clone(),
            source,
        })?;
    if signature.generic_params > 0 {
        return Err(ScanError::Generic { method: qualified });
    }

    let params = module
        .get_params(method)
        .map_err(|source| ScanError::Signature {
            method: qualified.clone(),
            source,
        })?;

    let mut return_c99_type = None;
    let mut parameters: Vec<ParameterDescriptor> = signature
        .params
        .into_iter()
        .enumerate()
        .map(|(i, managed_type)| ParameterDescriptor {
            name: format!("arg{i}"),
            managed_type,
            c99_type: None,
        })
        .collect();

    for param in &params {
        let c99_type = c99_type_override(module, param.token, &qualified)?;
        match param.sequence {
            0 => return_c99_type = c99_type,
            n => {
                if let Some(slot) = parameters.get_mut(n as usize - 1) {
                    if is_free_c_name(&param.name) {
                        slot.name = param.name.clone();
                    }
                    slot.c99_type = c99_type;
                }
            }
        }
    }
    // A declared name may equal another parameter's positional fallback.
    let mut names = FxHashSet::default();
    if !parameters.iter().all(|p| names.insert(p.name.as_str())) {
        for (i, param) in parameters.iter_mut().enumerate() {
            param.name = format!("arg{i}");
        }
    }

    let mut decl_code = Vec::new();
    let mut includes = Vec::new();
    for attr in module.get_attributes(method.token) {
        if attr.is(C99_DECL_CODE) {
            decl_code.push(string_argument(module, attr, C99_DECL_CODE, &qualified)?);
        } else if attr.is(C99_INCLUDE) {
            includes.push(string_argument(module, attr, C99_INCLUDE, &qualified)?);
        }
    }

    Ok(ExportDescriptor {
        method: method.token,
        type_name: ty.qualified_name(),
        method_name: method.name.clone(),
        entry_point,
        parameters,
        return_type: signature.return_type,
        return_c99_type,
        calling_convention,
        kind,
        decl_code,
        includes,
    })
}

fn c99_type_override(
    module: &ManagedModule,
    param: Token,
    method: &str,
) -> Result<Option<String>, ScanError> {
    module
        .get_attributes(param)
        .iter()
        .find(|attr| attr.is(C99_TYPE))
        .map(|attr| string_argument(module, attr, C99_TYPE, method))
        .transpose()
}

fn arguments(
    module: &ManagedModule,
    attribute: &Attribute,
    name: &'static str,
    method: &str,
) -> Result<AttributeArguments, ScanError> {
    module
        .get_attribute_arguments(attribute)
        .map_err(|err| ScanError::MalformedAttribute {
            attribute: name,
            method: method.to_owned(),
            detail: err.to_string(),
        })
}

/// The single string argument of a `C99*` annotation.
fn string_argument(
    module: &ManagedModule,
    attribute: &Attribute,
    name: &'static str,
    method: &str,
) -> Result<String, ScanError> {
    let arguments = arguments(module, attribute, name, method)?;
    match arguments.fixed.first().and_then(AttributeValue::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_owned()),
        _ => Err(ScanError::MalformedAttribute {
            attribute: name,
            method: method.to_owned(),
            detail: "expected a non-empty string argument".into(),
        }),
    }
}

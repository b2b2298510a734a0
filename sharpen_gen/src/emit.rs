//! C header and dispatch stub emission.
//!
//! Output depends only on its inputs; exports are emitted in the order given.

use rustc_hash::FxHashSet;

use crate::binding::ExportBinding;

/// Header and stub source for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub header_name: String,
    pub header: String,
    pub source: String,
}

/// Renders an include entry; bare names become `#include <name>`.
pub fn include_directive(include: &str) -> String {
    let include = include.trim();
    if include.starts_with("#include") {
        include.to_owned()
    } else if include.starts_with('<') || include.starts_with('"') {
        format!("#include {include}")
    } else {
        format!("#include <{include}>")
    }
}

/// Escapes `text` for use inside a C string literal.
pub fn c_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for byte in text.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7E => out.push(byte as char),
            // Octal escapes stop after three digits, unlike \x.
            _ => out.push_str(&format!("\\{byte:03o}")),
        }
    }
    out.push('"');
    out
}

/// Keeps the first occurrence of each fragment.
#[derive(Default)]
struct Fragments<'a> {
    seen: FxHashSet<&'a str>,
    ordered: Vec<&'a str>,
}

impl<'a> Fragments<'a> {
    fn push(&mut self, fragment: &'a str) {
        if self.seen.insert(fragment) {
            self.ordered.push(fragment);
        }
    }
}

const BANNER: &str = "/* Generated by sharpen-gen. Do not edit. */";

const PLATFORM_MACROS: &str = r#"#ifndef SHARPEN_API
#ifdef __cplusplus
#define SHARPEN_EXTERN_C extern "C"
#else
#define SHARPEN_EXTERN_C
#endif

#ifdef _WIN32
#define SHARPEN_EXPORT_API __declspec(dllexport)
#define SHARPEN_CALLTYPE __stdcall
#define SHARPEN_CALLTYPE_CDECL __cdecl
#define SHARPEN_CALLTYPE_STDCALL __stdcall
#define SHARPEN_CALLTYPE_THISCALL __thiscall
#define SHARPEN_CALLTYPE_FASTCALL __fastcall
#else
#define SHARPEN_EXPORT_API __attribute__((visibility("default")))
#define SHARPEN_CALLTYPE
#define SHARPEN_CALLTYPE_CDECL
#define SHARPEN_CALLTYPE_STDCALL
#define SHARPEN_CALLTYPE_THISCALL
#define SHARPEN_CALLTYPE_FASTCALL
#endif

#define SHARPEN_API SHARPEN_EXTERN_C SHARPEN_EXPORT_API
#endif

#ifndef SHARPEN_WCHAR
#define SHARPEN_WCHAR uint16_t
#endif

#ifndef SHARPEN_FAILURE_TYPES
#define SHARPEN_FAILURE_TYPES
typedef enum sharpen_failure_kind {
    SHARPEN_FAILURE_LOCATE_RUNTIME = 1,
    SHARPEN_FAILURE_LOAD_RUNTIME = 2,
    SHARPEN_FAILURE_RESOLVE_EXPORT = 3
} sharpen_failure_kind;

typedef void (*sharpen_failure_fn)(sharpen_failure_kind kind, int32_t code, const char* name);
#endif
"#;

const HOST_ABI: &str = "\
SHARPEN_EXTERN_C void sharpen_set_failure_callback(sharpen_failure_fn callback);
SHARPEN_EXTERN_C int32_t sharpen_preload_runtime(const char* assembly_name);
SHARPEN_EXTERN_C void* sharpen_resolve_export(
    const char* assembly_name,
    const char* entry_point,
    const char* type_name,
    const char* method_name,
    const char* delegate_type_name);
";

const LIFECYCLE: &str = "\
SHARPEN_API void set_failure_callback(sharpen_failure_fn callback)
{
    sharpen_set_failure_callback(callback);
}

SHARPEN_API int32_t preload_runtime(void)
{
    return sharpen_preload_runtime(SHARPEN_ASSEMBLY_NAME);
}
";

/// `SHARPEN_<MODULE>_G_H`.
fn include_guard(module_name: &str) -> String {
    let tag: String = module_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SHARPEN_{tag}_G_H")
}

fn parameter_list(export: &ExportBinding) -> String {
    if export.parameters.is_empty() {
        return "void".to_owned();
    }
    export
        .parameters
        .iter()
        .map(|p| format!("{} {}", p.binding.type_expr, p.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn prototype(export: &ExportBinding) -> String {
    format!(
        "SHARPEN_API {} {} {}({})",
        export.return_value.type_expr,
        export.export.calling_convention.macro_name(),
        export.export.entry_point,
        parameter_list(export)
    )
}

/// ## Functionality
/// Emits the header and stub source for `exports`.
///
/// ## Parameters
/// `module_name`: value of `SHARPEN_ASSEMBLY_NAME`, also used for the include guard
///
/// `header_name`: how the stub source includes the header
///
/// `module_includes`: `C99Include` entries on the assembly
pub fn emit(
    module_name: &str,
    header_name: &str,
    module_includes: &[String],
    exports: &[ExportBinding],
) -> GeneratedArtifact {
    GeneratedArtifact {
        header_name: header_name.to_owned(),
        header: emit_header(module_name, module_includes, exports),
        source: emit_source(module_name, header_name, exports),
    }
}

fn emit_header(module_name: &str, module_includes: &[String], exports: &[ExportBinding]) -> String {
    let guard = include_guard(module_name);
    let mut out = String::new();

    out.push_str(BANNER);
    out.push('\n');
    out.push_str(&format!("/* Managed module: {module_name} */\n"));
    out.push_str(&format!("#ifndef {guard}\n#define {guard}\n\n"));
    out.push_str("#include <stddef.h>\n#include <stdint.h>\n");

    let mut includes = Fragments::default();
    let rendered: Vec<String> = module_includes
        .iter()
        .map(String::as_str)
        .chain(exports.iter().flat_map(ExportBinding::includes))
        .map(include_directive)
        .collect();
    for include in &rendered {
        includes.push(include);
    }
    for include in &includes.ordered {
        out.push_str(include);
        out.push('\n');
    }
    out.push('\n');

    out.push_str(PLATFORM_MACROS);
    out.push('\n');
    out.push_str("SHARPEN_API void set_failure_callback(sharpen_failure_fn callback);\n");
    out.push_str("SHARPEN_API int32_t preload_runtime(void);\n");

    let mut declarations = Fragments::default();
    for export in exports {
        for declaration in export.declarations() {
            declarations.push(declaration);
        }
    }
    for declaration in &declarations.ordered {
        out.push('\n');
        out.push_str(declaration.trim_end());
        out.push('\n');
    }

    if !exports.is_empty() {
        out.push('\n');
    }
    for export in exports {
        out.push_str(&prototype(export));
        out.push_str(";\n");
    }

    out.push_str(&format!("\n#endif /* {guard} */\n"));
    out
}

fn emit_source(module_name: &str, header_name: &str, exports: &[ExportBinding]) -> String {
    let mut out = String::new();

    out.push_str(BANNER);
    out.push('\n');
    out.push_str(&format!("#include {}\n\n", c_string_literal(header_name)));
    out.push_str(&format!(
        "#define SHARPEN_ASSEMBLY_NAME {}\n\n",
        c_string_literal(module_name)
    ));
    out.push_str(HOST_ABI);
    out.push('\n');
    out.push_str(LIFECYCLE);

    for export in exports {
        out.push('\n');
        out.push_str(&stub(module_name, export));
    }
    out
}

fn stub(module_name: &str, binding: &ExportBinding) -> String {
    let export = &binding.export;
    let fn_type = format!("sharpen_{}_fn", export.entry_point);
    let return_type = &binding.return_value.type_expr;
    let returns_void = return_type == "void";
    let arguments = binding
        .parameters
        .iter()
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let delegate = export
        .delegate_type()
        .map_or_else(|| "NULL".to_owned(), c_string_literal);

    let mut out = String::new();
    out.push_str(&format!(
        "typedef {return_type} ({}* {fn_type})({});\n\n",
        export.calling_convention.macro_name(),
        parameter_list(binding)
    ));
    out.push_str(&prototype(binding));
    out.push_str("\n{\n");
    out.push_str(&format!(
        "    {fn_type} sharpen_target = ({fn_type})sharpen_resolve_export(\n        SHARPEN_ASSEMBLY_NAME,\n        {},\n        {},\n        {},\n        {delegate});\n",
        c_string_literal(&export.entry_point),
        c_string_literal(&export.assembly_qualified_type(module_name)),
        c_string_literal(&export.method_name),
    ));
    out.push_str("    if (sharpen_target == NULL) {\n");
    if returns_void {
        out.push_str("        return;\n");
    } else {
        out.push_str(&format!("        {return_type} sharpen_failed = {{0}};\n"));
        out.push_str("        return sharpen_failed;\n");
    }
    out.push_str("    }\n");
    if returns_void {
        out.push_str(&format!("    sharpen_target({arguments});\n"));
    } else {
        out.push_str(&format!("    return sharpen_target({arguments});\n"));
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_forms() {
        assert_eq!(include_directive("windows.h"), "#include <windows.h>");
        assert_eq!(include_directive("\"local.h\""), "#include \"local.h\"");
        assert_eq!(include_directive("<stdio.h>"), "#include <stdio.h>");
        assert_eq!(include_directive("#include <math.h>"), "#include <math.h>");
    }

    #[test]
    fn string_literals_are_escaped() {
        assert_eq!(c_string_literal("Ns.Type, Asm"), "\"Ns.Type, Asm\"");
        assert_eq!(c_string_literal("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(c_string_literal("é"), "\"\\303\\251\"");
    }

    #[test]
    fn guard_is_upper_snake() {
        assert_eq!(include_guard("Example.Managed"), "SHARPEN_EXAMPLE_MANAGED_G_H");
    }
}

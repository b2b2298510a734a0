mod common;

use common::{
    ImageBuilder, PRIVATE_STATIC, PUBLIC_INSTANCE, PUBLIC_STATIC, Parent, TypeKind,
    blob::{self, Named},
    sig,
};
use pretty_assertions::assert_eq;
use sharpen_gen::{
    CallingConvention, ExportKind, ManagedModule, ManagedType, Severity, scanner::scan,
};

fn module(builder: ImageBuilder) -> ManagedModule {
    ManagedModule::from_bytes("Test", builder.build()).unwrap()
}

#[test]
fn finds_the_fancy_name_export() {
    let module = ManagedModule::from_bytes("Example.Managed", common::fancy_name_image()).unwrap();
    let output = scan(&module).unwrap();

    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(output.exports.len(), 1);
    let export = &output.exports[0];
    assert_eq!(export.type_name, "Example.Managed.Exports");
    assert_eq!(export.method_name, "MyExport");
    assert_eq!(export.entry_point, "FancyName");
    assert_eq!(export.return_type, ManagedType::Int);
    assert_eq!(export.parameters.len(), 1);
    assert_eq!(export.parameters[0].name, "a");
    assert_eq!(export.parameters[0].managed_type, ManagedType::Int);
    assert_eq!(export.calling_convention, CallingConvention::Default);
    assert_eq!(export.kind, ExportKind::UnmanagedCallersOnly);
    assert_eq!(
        export.assembly_qualified_type(module.name()),
        "Example.Managed.Exports, Example.Managed"
    );
}

#[test]
fn ignores_unannotated_methods_and_keeps_table_order() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let second = b.method("Second", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    b.method("Helper", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    let first = b.method("First", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    b.type_def("Lib", "B", TypeKind::Class);
    let third = b.method("Third", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    for method in [second, first, third] {
        b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &blob::args(&[], &[]));
    }

    let output = scan(&module(b)).unwrap();
    let names: Vec<&str> = output.exports.iter().map(|e| e.entry_point.as_str()).collect();
    assert_eq!(names, vec!["Second", "First", "Third"]);
}

#[test]
fn entry_point_defaults_to_the_method_name() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let plain = b.method("Plain", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    let null = b.method("NullName", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    b.custom_attribute(Parent::Method(plain), attrs.unmanaged_callers_only, &[]);
    b.custom_attribute(
        Parent::Method(null),
        attrs.unmanaged_callers_only,
        &blob::args(&[], &[Named::NullString("EntryPoint")]),
    );

    let output = scan(&module(b)).unwrap();
    let names: Vec<&str> = output.exports.iter().map(|e| e.entry_point.as_str()).collect();
    assert_eq!(names, vec!["Plain", "NullName"]);
}

#[test]
fn call_convs_select_the_calling_convention() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let method = b.method("Add", PUBLIC_STATIC, &sig::method(sig::I4, &[sig::I4, sig::I4]));
    b.custom_attribute(
        Parent::Method(method),
        attrs.unmanaged_callers_only,
        &blob::args(
            &[],
            &[
                Named::Types(
                    "CallConvs",
                    &[
                        "System.Runtime.CompilerServices.CallConvSuppressGCTransition, System.Runtime",
                        "System.Runtime.CompilerServices.CallConvCdecl, System.Runtime",
                    ],
                ),
                Named::String("EntryPoint", "add_ints"),
            ],
        ),
    );

    let output = scan(&module(b)).unwrap();
    assert_eq!(output.exports[0].entry_point, "add_ints");
    assert_eq!(output.exports[0].calling_convention, CallingConvention::Cdecl);
    // Parameters without Param rows get positional names.
    let names: Vec<&str> = output.exports[0].parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["arg0", "arg1"]);
}

#[test]
fn non_public_and_instance_methods_are_reported_and_skipped() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let private = b.method("Hidden", PRIVATE_STATIC, &sig::method(sig::VOID, &[]));
    let instance = b.method("Member", PUBLIC_INSTANCE, &sig::instance_method(sig::VOID, &[]));
    let fine = b.method("Fine", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    for method in [private, instance, fine] {
        b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &[]);
    }

    let output = scan(&module(b)).unwrap();
    assert_eq!(output.exports.len(), 1);
    assert_eq!(output.exports[0].entry_point, "Fine");

    let messages: Vec<String> = output.diagnostics.errors().map(|d| d.message.clone()).collect();
    assert_eq!(
        messages,
        vec![
            "Lib.A.Hidden must be public to be exported",
            "Lib.A.Member must be static to be exported",
        ]
    );
}

#[test]
fn nested_types_are_ignored_with_a_warning() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    let outer = b.type_def("Lib", "Outer", TypeKind::Class);
    b.nested_type_def(outer, "Inner", TypeKind::Class);
    let method = b.method("Nested", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &[]);

    let output = scan(&module(b)).unwrap();
    assert!(output.exports.is_empty());
    let diagnostics: Vec<_> = output.diagnostics.iter().collect();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].severity, Severity::Warning);
    assert_eq!(diagnostics[0].export.as_deref(), Some("Lib.Outer+Inner.Nested"));
}

#[test]
fn invalid_and_duplicate_entry_points_are_rejected() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let names = ["Good", "Good", "not-valid", "2fast", "preload_runtime", "sharpen_init", "size_t"];
    for (i, entry_point) in names.iter().enumerate() {
        let method = b.method(&format!("M{i}"), PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
        b.custom_attribute(
            Parent::Method(method),
            attrs.unmanaged_callers_only,
            &blob::args(&[], &[Named::String("EntryPoint", entry_point)]),
        );
    }

    let output = scan(&module(b)).unwrap();
    assert_eq!(output.exports.len(), 1);
    assert_eq!(output.exports[0].method_name, "M0");

    let messages: Vec<String> = output.diagnostics.errors().map(|d| d.message.clone()).collect();
    assert_eq!(
        messages,
        vec![
            "entry point `Good` is already exported by Lib.A.M0",
            "entry point `not-valid` is not a valid C identifier",
            "entry point `2fast` is not a valid C identifier",
            "entry point `preload_runtime` is reserved by the generated code",
            "entry point `sharpen_init` is reserved by the generated code",
            "entry point `size_t` is reserved by the generated code",
        ]
    );
}

#[test]
fn malformed_annotations_become_diagnostics() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let bad_blob = b.method("BadBlob", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    let bad_type = b.method("BadType", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    b.custom_attribute(Parent::Method(bad_blob), attrs.unmanaged_callers_only, &[0x02, 0x00]);
    b.custom_attribute(
        Parent::Method(bad_type),
        attrs.unmanaged_callers_only,
        &blob::args(&[], &[Named::Int("EntryPoint", 5)]),
    );

    let output = scan(&module(b)).unwrap();
    assert!(output.exports.is_empty());
    assert_eq!(output.diagnostics.errors().count(), 2);
    assert!(output.diagnostics.iter().all(|d| d.message.starts_with("malformed")));
}

#[test]
fn generic_methods_cannot_be_exported() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let method = b.method("Generic", PUBLIC_STATIC, &sig::generic_method(sig::VOID, &[]));
    b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &[]);

    let output = scan(&module(b)).unwrap();
    assert!(output.exports.is_empty());
    assert!(output.diagnostics.has_errors());
}

#[test]
fn export_attribute_dispatches_through_a_nested_delegate() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    let exports = b.type_def("Lib", "Exports", TypeKind::Class);
    let with = b.method("WithDelegate", PUBLIC_STATIC, &sig::method(sig::I4, &[]));
    let without = b.method("WithoutDelegate", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    b.custom_attribute(Parent::Method(with), attrs.export, &blob::args(&[], &[Named::String("EntryPoint", "with_delegate")]));
    b.custom_attribute(Parent::Method(without), attrs.export, &[]);
    b.nested_type_def(exports, "WithDelegateDelegate", TypeKind::Delegate);

    let output = scan(&module(b)).unwrap();
    assert_eq!(output.exports.len(), 2);
    assert_eq!(
        output.exports[0].kind,
        ExportKind::Delegate {
            delegate_type: "Lib.Exports+WithDelegateDelegate, Lib".into()
        }
    );
    assert_eq!(output.exports[0].entry_point, "with_delegate");
    assert_eq!(
        output.exports[1].delegate_type(),
        Some("Lib.Exports+WithoutDelegateDelegate, Lib")
    );

    let warnings: Vec<_> = output
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].export.as_deref(), Some("WithoutDelegate"));
    assert!(!output.diagnostics.has_errors());
}

#[test]
fn unmanaged_callers_only_takes_priority_over_export() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let method = b.method("Both", PUBLIC_STATIC, &sig::method(sig::VOID, &[]));
    b.custom_attribute(Parent::Method(method), attrs.export, &[]);
    b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &[]);

    let output = scan(&module(b)).unwrap();
    assert_eq!(output.exports[0].kind, ExportKind::UnmanagedCallersOnly);
}

#[test]
fn c99_annotations_are_collected() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.custom_attribute(Parent::Assembly, attrs.c99_include, &blob::string("stdbool.h"));
    b.type_def("Lib", "A", TypeKind::Class);
    let method = b.method(
        "IsReady",
        PUBLIC_STATIC,
        &sig::method(sig::BOOL, &[sig::BOOL, sig::I4]),
    );
    let ret = b.param(0, "");
    let flag = b.param(1, "flag");
    b.param(2, "int");
    b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &[]);
    b.custom_attribute(Parent::Method(method), attrs.c99_include, &blob::string("\"ready.h\""));
    b.custom_attribute(Parent::Method(method), attrs.c99_decl_code, &blob::string("typedef int ready_t;"));
    b.custom_attribute(Parent::Param(ret), attrs.c99_type, &blob::string("bool"));
    b.custom_attribute(Parent::Param(flag), attrs.c99_type, &blob::string("bool"));

    let output = scan(&module(b)).unwrap();
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(output.includes, vec!["stdbool.h"]);

    let export = &output.exports[0];
    assert_eq!(export.return_c99_type.as_deref(), Some("bool"));
    assert_eq!(export.parameters[0].name, "flag");
    assert_eq!(export.parameters[0].c99_type.as_deref(), Some("bool"));
    // `int` is a C keyword, so the positional name is kept.
    assert_eq!(export.parameters[1].name, "arg1");
    assert_eq!(export.parameters[1].c99_type, None);
    assert_eq!(export.includes, vec!["\"ready.h\""]);
    assert_eq!(export.decl_code, vec!["typedef int ready_t;"]);
}

#[test]
fn empty_c99_type_is_malformed() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let method = b.method("M", PUBLIC_STATIC, &sig::method(sig::VOID, &[sig::BOOL]));
    let param = b.param(1, "flag");
    b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &[]);
    b.custom_attribute(Parent::Param(param), attrs.c99_type, &blob::string("  "));

    let output = scan(&module(b)).unwrap();
    assert!(output.exports.is_empty());
    assert_eq!(output.diagnostics.errors().count(), 1);
}

#[test]
fn parameter_names_used_by_generated_code_fall_back_to_positions() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let method = b.method(
        "Aim",
        PUBLIC_STATIC,
        &sig::method(sig::VOID, &[sig::I4, sig::I4, sig::I4, sig::I4, sig::I4]),
    );
    b.param(1, "target");
    b.param(2, "int32_t");
    b.param(3, "NULL");
    b.param(4, "SHARPEN_ASSEMBLY_NAME");
    b.param(5, "sharpen_Aim_fn");
    b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &[]);

    let output = scan(&module(b)).unwrap();
    let names: Vec<&str> = output.exports[0].parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["target", "arg1", "arg2", "arg3", "arg4"]);
}

#[test]
fn clashing_parameter_names_become_positional() {
    let mut b = ImageBuilder::new("Lib");
    let attrs = b.sharpen_attributes();
    b.type_def("Lib", "A", TypeKind::Class);
    let method = b.method("Swap", PUBLIC_STATIC, &sig::method(sig::VOID, &[sig::I4, sig::I4]));
    // The second parameter keeps its positional name, which the first one claims.
    b.param(1, "arg1");
    b.custom_attribute(Parent::Method(method), attrs.unmanaged_callers_only, &[]);

    let output = scan(&module(b)).unwrap();
    let names: Vec<&str> = output.exports[0].parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["arg0", "arg1"]);
}

#[test]
fn scanning_with_debug_logging_enabled() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish();
    let module = ManagedModule::from_bytes("Example.Managed", common::fancy_name_image()).unwrap();

    let output = tracing::subscriber::with_default(subscriber, || scan(&module).unwrap());
    assert_eq!(output.exports.len(), 1);
    assert_eq!(output.exports[0].entry_point, "FancyName");
}

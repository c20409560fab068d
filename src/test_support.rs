//! Shared fixtures: a small host runtime with framework controls and demo
//! view models, plus a reference directory for it.

use serde_json::json;
use std::fs;
use std::path::Path;

use crate::config::CompilerConfig;
use crate::host::HostContext;
use crate::references::STDLIB_MANIFEST;

pub const DEMO_HOST: &str = r#"{
    "runtimeVersion": "1.0",
    "types": [
        { "name": "System.Object", "assembly": "System.Runtime" },
        { "name": "System.Void", "assembly": "System.Runtime", "kind": "struct" },
        { "name": "System.Boolean", "assembly": "System.Runtime", "kind": "struct" },
        { "name": "System.Int32", "assembly": "System.Runtime", "kind": "struct" },
        { "name": "System.Double", "assembly": "System.Runtime", "kind": "struct" },
        { "name": "System.String", "assembly": "System.Runtime", "base": "System.Object" },
        { "name": "System.Nullable`1", "assembly": "System.Runtime", "kind": "struct" },
        { "name": "System.Nullable`1[System.Double]", "assembly": "System.Runtime", "kind": "struct",
          "genericDefinition": "System.Nullable`1", "typeArguments": ["System.Double"] },

        { "name": "Ui.UIElement", "assembly": "Ui.Framework", "base": "System.Object" },
        { "name": "Ui.TextBlock", "assembly": "Ui.Framework", "base": "Ui.UIElement", "members": [
            { "name": "Text", "kind": "property", "type": "System.String", "write": true, "bindable": true },
            { "name": "Value", "kind": "property", "type": "System.Double", "write": true, "bindable": true },
            { "name": "Count", "kind": "property", "type": "System.Int32", "write": true, "bindable": true }
        ] },
        { "name": "Ui.Grid", "assembly": "Ui.Framework", "base": "Ui.UIElement", "members": [
            { "name": "Row", "kind": "property", "type": "System.Int32", "write": true,
              "bindable": true, "attached": true }
        ] },
        { "name": "Ui.FrameworkTemplate", "assembly": "Ui.Framework", "base": "Ui.UIElement" },
        { "name": "Ui.DataTemplate", "assembly": "Ui.Framework", "base": "Ui.FrameworkTemplate" },
        { "name": "Ui.ContentControl", "assembly": "Ui.Framework", "base": "Ui.UIElement", "members": [
            { "name": "Content", "kind": "property", "type": "System.Object", "write": true, "bindable": true }
        ] },
        { "name": "Ui.ItemsControl", "assembly": "Ui.Framework", "base": "Ui.UIElement", "members": [
            { "name": "Items", "kind": "property", "type": "System.Object", "write": true, "bindable": true }
        ] },

        { "name": "Demo.MainViewModel", "assembly": "Demo", "base": "System.Object", "members": [
            { "name": "Foo", "kind": "property", "type": "System.Nullable`1[System.Double]", "write": true },
            { "name": "Name", "kind": "property", "type": "System.String", "write": true },
            { "name": "Title", "kind": "property", "type": "System.String" },
            { "name": "Ratio", "kind": "property", "type": "System.Double", "write": true },
            { "name": "Child", "kind": "property", "type": "Demo.Node" },
            { "name": "Refresh", "kind": "method", "type": "System.Void" }
        ] },
        { "name": "Demo.Node", "assembly": "Demo", "base": "System.Object", "members": [
            { "name": "Next", "kind": "property", "type": "Demo.Node" },
            { "name": "Owner", "kind": "property", "type": "Demo.Tree" }
        ] },
        { "name": "Demo.Tree", "assembly": "Demo", "base": "System.Object", "members": [
            { "name": "Root", "kind": "property", "type": "Demo.Node" }
        ] },
        { "name": "Demo.ItemViewModel", "assembly": "Demo", "base": "System.Object", "members": [
            { "name": "Label", "kind": "property", "type": "System.String", "write": true }
        ] },
        { "name": "Demo.Shell", "assembly": "Demo", "base": "Ui.ContentControl" }
    ],
    "knownTypes": {
        "TextBlock": "Ui.TextBlock",
        "Grid": "Ui.Grid",
        "DataTemplate": "Ui.DataTemplate",
        "ContentControl": "Ui.ContentControl",
        "ItemsControl": "Ui.ItemsControl"
    },
    "defaultProperties": {
        "Ui.TextBlock": "Text"
    }
}"#;

pub fn demo_host() -> HostContext {
    HostContext::from_json(DEMO_HOST).unwrap()
}

/// Writes a reference directory holding the framework assemblies.
pub fn write_stdlib(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    let manifest = json!({ "assemblies": ["System.Runtime", "Ui.Framework"] });
    fs::write(dir.join(STDLIB_MANIFEST), manifest.to_string()).unwrap();
}

/// Default config with its SDK root at `sdk`, which receives a reference
/// directory.
pub fn demo_config(sdk: &Path) -> CompilerConfig {
    write_stdlib(sdk);
    let mut config = CompilerConfig::default();
    config.references.sdk_root = Some(sdk.to_path_buf());
    config
}

pub fn view_markup(body: &str) -> String {
    format!(
        "<View ViewModelType=\"Demo.MainViewModel, Demo\" Namespace=\"Demo.Views\">\n{}\n</View>",
        body
    )
}

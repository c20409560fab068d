#[cfg(test)]
mod tests {
    use crate::cache::manifest_path;
    use crate::codegen::{self, METADATA_UNIT};
    use crate::compilation::{Compilation, SyntaxTree};
    use crate::config::{BuildConfiguration, CompilerConfig};
    use crate::diagnostics::{
        Severity, ERR_NOT_A_VIEW, ERR_NO_CONVERSION, ERR_NO_REFERENCES, ERR_UNKNOWN_TYPE,
        ERR_UNRESOLVED_MEMBER, WARN_UNREFERENCED_ASSEMBLY,
    };
    use crate::discovery::WrapperInfo;
    use crate::fixup::fixup_tree;
    use crate::host::HostContext;
    use crate::pipeline::{CompileOptions, PipelineState, ViewCompiler, ERROR_LOG};
    use crate::references::ReferenceSet;
    use crate::test_support::{demo_config, demo_host, view_markup};
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    const FULL_RUN: [PipelineState; 5] = [
        PipelineState::GatherReferences,
        PipelineState::InitialCompile,
        PipelineState::Fixup,
        PipelineState::Emit,
        PipelineState::Succeeded,
    ];

    struct Fixture {
        tmp: TempDir,
        host: HostContext,
        config: CompilerConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let config = demo_config(&tmp.path().join("sdk"));
            Self {
                tmp,
                host: demo_host(),
                config,
            }
        }

        fn input(&self) -> PathBuf {
            self.tmp.path().join("views")
        }

        fn output(&self) -> PathBuf {
            self.tmp.path().join("out").join("Views.vcmod")
        }

        fn work(&self) -> PathBuf {
            self.tmp.path().join("work")
        }

        fn write_view(&self, name: &str, body: &str) {
            fs::create_dir_all(self.input()).unwrap();
            fs::write(self.input().join(name), view_markup(body)).unwrap();
        }

        fn options(&self) -> CompileOptions {
            CompileOptions {
                working_dir: Some(self.work()),
                ..CompileOptions::default()
            }
        }

        fn compiler(&self) -> ViewCompiler<'_> {
            ViewCompiler::new(&self.host, self.config.clone())
        }

        fn in_memory(&self, body: &str) -> crate::pipeline::CompileResult {
            let options = CompileOptions {
                generate_in_memory: true,
                ..self.options()
            };
            self.compiler().compile_single_view(&view_markup(body), &options)
        }
    }

    fn assert_rerender_matches(fixture: &Fixture, wrapper: &WrapperInfo) {
        assert_eq!(
            codegen::render(wrapper, &fixture.host, &fixture.config),
            wrapper.source_text
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FIXUP OUTCOMES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_nullable_binding_is_unwrapped_and_loses_its_setter() {
        let fixture = Fixture::new();
        let result = fixture.in_memory(r#"<TextBlock Value="{{Binding Foo}}"/>"#);
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.stages, FULL_RUN.to_vec());

        let wrapper = &result.wrappers[0];
        let expr = &wrapper.expressions[0];
        assert!(expr.generate_getter);
        assert!(!expr.generate_setter);
        assert!(expr.nullable_fixup);
        assert_eq!(expr.conversion_target, None);

        let source = result.generated_source.as_deref().unwrap();
        assert!(source.contains("return runtime.unwrapOrDefault(this.source.Foo);"));
        assert!(!source.contains("set __bind_0"));
        assert_rerender_matches(&fixture, wrapper);
    }

    #[test]
    fn test_explicit_conversion_is_spelled_out() {
        let fixture = Fixture::new();
        let result = fixture.in_memory(r#"<TextBlock Count="{{Binding Ratio}}"/>"#);
        assert!(result.success, "{:?}", result.errors);

        let wrapper = &result.wrappers[0];
        let expr = &wrapper.expressions[0];
        assert!(!expr.nullable_fixup);
        assert!(!expr.generate_setter);
        assert_eq!(expr.conversion_source.as_deref(), Some("System.Double"));
        assert_eq!(expr.conversion_target.as_deref(), Some("System.Int32"));
        assert!(wrapper
            .source_text
            .contains("return runtime.convert<System.Int32>(this.source.Ratio);"));
        assert_rerender_matches(&fixture, wrapper);
    }

    #[test]
    fn test_setter_survives_only_when_target_is_writable() {
        let fixture = Fixture::new();
        let result = fixture.in_memory(
            r#"<TextBlock Text="{{Binding Name}}"/>
               <TextBlock Text="{{Binding Title}}"/>"#,
        );
        assert!(result.success, "{:?}", result.errors);

        let wrapper = &result.wrappers[0];
        assert!(wrapper.expressions[0].generate_setter);
        assert!(!wrapper.expressions[1].generate_setter);
        assert!(wrapper.expressions.iter().all(|e| !e.nullable_fixup));
        assert!(wrapper.source_text.contains("this.source.Name = value;"));
        assert!(!wrapper.source_text.contains("this.source.Title = value;"));
        assert_rerender_matches(&fixture, wrapper);
    }

    #[test]
    fn test_dependents_share_the_unit_and_get_outcomes() {
        let fixture = Fixture::new();
        let result = fixture.in_memory(
            r#"<TextBlock Value="{{Binding Foo}}"/>
               <ItemsControl>
                 <DataTemplate ViewModelType="Demo.ItemViewModel, Demo">
                   <TextBlock Text="{{Binding Label}}"/>
                 </DataTemplate>
               </ItemsControl>"#,
        );
        assert!(result.success, "{:?}", result.errors);

        let wrapper = &result.wrappers[0];
        let dependent = &wrapper.dependents[0];
        assert!(dependent.source_text.is_empty());
        assert!(dependent.expressions[0].generate_setter);
        assert!(wrapper.expressions[0].nullable_fixup);
        assert!(wrapper
            .source_text
            .contains(&format!("export class {} implements", dependent.class_name)));
        assert_rerender_matches(&fixture, wrapper);

        let module = result.module.unwrap();
        assert!(module.binding_table(&dependent.qualified_name()).is_some());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EMISSION & CACHE
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_in_memory_module_carries_units_and_metadata() {
        let fixture = Fixture::new();
        let options = CompileOptions {
            generate_in_memory: true,
            generate_debug_info: true,
            configuration: BuildConfiguration::Release,
            ..fixture.options()
        };
        let result = fixture
            .compiler()
            .compile_single_view(&view_markup(r#"<TextBlock Value="{{Binding Foo}}"/>"#), &options);
        assert!(result.success, "{:?}", result.errors);

        let module = result.module.unwrap();
        let qualified = result.wrappers[0].qualified_name();
        assert_eq!(module.metadata.configuration, BuildConfiguration::Release);
        assert!(module.unit(METADATA_UNIT).is_some());
        assert!(module.unit(&format!("{}.ts", qualified)).is_some());

        let table = module.binding_table(&qualified).unwrap();
        assert_eq!(table.wrapped_type, "Demo.MainViewModel");
        assert_eq!(table.bindings[0].member_path, "Foo");
        assert!(!table.bindings[0].setter);
        assert_eq!(module.debug.unwrap().documents.len(), module.units.len());
    }

    #[test]
    fn test_noop_recompile_is_a_cache_hit() {
        let fixture = Fixture::new();
        fixture.write_view("Main.view", r#"<TextBlock Value="{{Binding Foo}}"/>"#);
        fixture.write_view("Other.view", r#"<TextBlock Text="{{Binding Name}}"/>"#);
        let compiler = fixture.compiler();
        let output = fixture.output();

        let first = compiler.compile(&fixture.input(), &output, &fixture.options());
        assert!(first.success, "{:?}", first.errors);
        assert!(!first.cache_hit);
        assert_eq!(first.stages, FULL_RUN.to_vec());
        assert_eq!(first.wrappers.len(), 2);
        assert!(output.is_file());
        assert!(manifest_path(&output).is_file());

        let second = compiler.compile(&fixture.input(), &output, &fixture.options());
        assert!(second.success);
        assert!(second.cache_hit);
        assert!(second.stages.is_empty());

        let forced = CompileOptions {
            ignore_cache: true,
            ..fixture.options()
        };
        let third = compiler.compile(&fixture.input(), &output, &forced);
        assert!(!third.cache_hit);
        assert_eq!(third.stages, FULL_RUN.to_vec());

        fixture.write_view("Other.view", r#"<TextBlock Text="{{Binding Title}}"/>"#);
        let fourth = compiler.compile(&fixture.input(), &output, &fixture.options());
        assert!(!fourth.cache_hit);
        assert!(fourth.success);
    }

    #[test]
    fn test_generated_units_are_cleaned_unless_kept() {
        let fixture = Fixture::new();
        fixture.write_view("Main.view", r#"<TextBlock Text="{{Binding Name}}"/>"#);
        let compiler = fixture.compiler();

        let result = compiler.compile(&fixture.input(), &fixture.output(), &fixture.options());
        assert!(result.success);
        let unit = fixture.work().join(result.wrappers[0].unit_name());
        assert!(!unit.exists());

        let keep = CompileOptions {
            keep_generated_files: true,
            ignore_cache: true,
            ..fixture.options()
        };
        let result = compiler.compile(&fixture.input(), &fixture.output(), &keep);
        assert!(result.success);
        let unit = fixture.work().join(result.wrappers[0].unit_name());
        assert_eq!(fs::read_to_string(unit).unwrap(), result.wrappers[0].source_text);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FAILURES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_type_errors_fail_without_output() {
        let fixture = Fixture::new();
        fixture.write_view(
            "Main.view",
            r#"<TextBlock Text="{{Binding Child}}"/>
               <TextBlock Text="{{Binding Missing}}"/>"#,
        );
        let options = CompileOptions {
            write_errors_to_file: true,
            ..fixture.options()
        };
        let result = fixture
            .compiler()
            .compile(&fixture.input(), &fixture.output(), &options);

        assert!(!result.success);
        assert_eq!(result.stages.last(), Some(&PipelineState::Failed));
        assert!(result.stages.contains(&PipelineState::Fixup));
        assert!(!result.stages.contains(&PipelineState::Emit));
        assert!(!fixture.output().exists());

        let codes: BTreeSet<&str> = result.errors.iter().map(|e| e.code.as_str()).collect();
        assert!(codes.contains(ERR_NO_CONVERSION));
        assert!(codes.contains(ERR_UNRESOLVED_MEMBER));

        let qualified = result.wrappers[0].qualified_name();
        assert!(result.errors.iter().all(|e| e.file == qualified));
        let log = fs::read_to_string(fixture.work().join(ERROR_LOG)).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains(&qualified));
        assert!(!log.contains("__unit_"));
    }

    #[test]
    fn test_discovery_errors_stop_the_run() {
        let fixture = Fixture::new();
        fixture.write_view("Good.view", r#"<TextBlock Text="{{Binding Name}}"/>"#);
        fixture.write_view("Bad.view", r#"<TextBlock Title="{{Binding Name}}"/>"#);

        let result = fixture
            .compiler()
            .compile(&fixture.input(), &fixture.output(), &fixture.options());
        assert!(!result.success);
        assert_eq!(result.stages, vec![PipelineState::Failed]);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].file.ends_with("Bad.view"));
        assert!(!fixture.output().exists());
    }

    #[test]
    fn test_missing_references_are_an_environment_error() {
        let fixture = Fixture::new();
        let mut config = fixture.config.clone();
        config.references.sdk_root = None;
        let options = CompileOptions {
            generate_in_memory: true,
            ..fixture.options()
        };
        let result = ViewCompiler::new(&fixture.host, config)
            .compile_single_view(&view_markup(r#"<TextBlock Text="{{Binding Name}}"/>"#), &options);

        assert!(!result.success);
        assert_eq!(
            result.stages,
            vec![PipelineState::GatherReferences, PipelineState::Failed]
        );
        assert_eq!(result.errors[0].code, ERR_NO_REFERENCES);
    }

    #[test]
    fn test_single_view_input_must_be_a_view() {
        let fixture = Fixture::new();
        let result = fixture
            .compiler()
            .compile_single_view("<Resources/>", &fixture.options());
        assert!(!result.success);
        assert_eq!(result.errors[0].code, ERR_NOT_A_VIEW);
        assert_eq!(result.stages, vec![PipelineState::Failed]);
    }

    #[test]
    #[should_panic(expected = "requires view markup")]
    fn test_single_view_rejects_empty_input() {
        let fixture = Fixture::new();
        fixture.compiler().compile_single_view("", &fixture.options());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SEMANTIC MODEL
    // ═══════════════════════════════════════════════════════════════════════════════

    fn compile_unit(host: &HostContext, text: &str, assemblies: &[&str]) -> Compilation {
        let references = ReferenceSet {
            assemblies: assemblies.iter().map(|a| a.to_string()).collect(),
            ..ReferenceSet::default()
        };
        Compilation::new(
            vec![SyntaxTree::parse("unit.ts", text)],
            Arc::new(references),
            host.shared_catalog(),
        )
    }

    #[test]
    fn test_semantic_diagnostics_cover_binding_properties_only() {
        let host = demo_host();
        let text = r#"export namespace N {
    export class W implements runtime.DataSourceWrapper<Demo.MainViewModel> {
        get Other(): Demo.Nope {
            return this.source.Nothing;
        }

        get __bind_0(): Demo.Nope {
            return this.source.Name;
        }

        get __bind_1(): Demo.Node {
            return this.source.Child;
        }
    }
}
"#;
        let compilation = compile_unit(&host, text, &["System.Runtime"]);
        let diagnostics = compilation.diagnostics();

        assert_eq!(diagnostics.len(), 2, "{:?}", diagnostics);
        assert_eq!(diagnostics[0].code, ERR_UNKNOWN_TYPE);
        assert_eq!(diagnostics[0].line, 7);
        assert_eq!(diagnostics[1].code, WARN_UNREFERENCED_ASSEMBLY);
        assert_eq!(diagnostics[1].severity, Severity::Warning);
    }

    #[test]
    fn test_fixup_tree_rewrites_in_order() {
        let host = demo_host();
        let text = r#"export namespace N {
    export class W implements runtime.DataSourceWrapper<Demo.MainViewModel> {
        get __bind_0(): System.Double {
            return this.source.Foo;
        }

        set __bind_0(value: System.Double) {
            this.source.Foo = value;
        }
    }
}
"#;
        let compilation = compile_unit(&host, text, &["System.Runtime", "Demo"]);
        let tree = Arc::clone(&compilation.trees()[0]);
        let result = fixup_tree(&compilation, &tree);

        let fixed = result.tree.unwrap();
        assert!(!fixed.has_syntax_errors());
        assert_eq!(
            fixed.text(),
            r#"export namespace N {
    export class W implements runtime.DataSourceWrapper<Demo.MainViewModel> {
        get __bind_0(): System.Double {
            return runtime.unwrapOrDefault(this.source.Foo);
        }
    }
}
"#
        );
        let outcome = &result.outcomes[0];
        assert_eq!(outcome.class_name, "W");
        assert!(outcome.nullable_fixup);
        assert!(!outcome.generate_setter);
    }
}

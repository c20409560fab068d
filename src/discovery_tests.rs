#[cfg(test)]
mod tests {
    use crate::config::CompilerConfig;
    use crate::diagnostics::{ERR_DIRECTIVE_VALUE, ERR_NOT_QUALIFIED, ERR_UNKNOWN_DIRECTIVE};
    use crate::discovery::{
        unique_wrapper_name, ContentKind, Discovery, DiscoveryError, DiscoveryErrorKind, WrapperInfo,
    };
    use crate::host::{HostContext, InMemoryTemplates, TemplateEntry};
    use crate::test_support::{demo_host, view_markup};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn discover(host: &HostContext, markup: &str) -> Result<WrapperInfo, DiscoveryError> {
        let config = CompilerConfig::default();
        let discovery = Discovery::new(host, &config);
        let view = discovery
            .view_from_source(markup, "Main.view")
            .unwrap()
            .expect("markup is a view");
        discovery.build_wrapper(Arc::new(view))
    }

    fn type_name(host: &HostContext, wrapper: &WrapperInfo, index: usize) -> String {
        host.catalog().display_name(wrapper.expressions[index].target_type)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_identical_expressions_are_collapsed() {
        let host = demo_host();
        let wrapper = discover(
            &host,
            &view_markup(
                r#"<TextBlock Text="{{Binding Name}}"/>
                   <TextBlock Text="{{Binding Name}}"/>
                   <TextBlock Count="{{Binding Name}}"/>
                   <TextBlock Value="{{Binding Ratio}}"/>"#,
            ),
        )
        .unwrap();

        let names: Vec<_> = wrapper.expressions.iter().map(|e| e.property_name.as_str()).collect();
        assert_eq!(names, vec!["__bind_0", "__bind_1", "__bind_2"]);
        assert_eq!(type_name(&host, &wrapper, 0), "System.String");
        assert_eq!(type_name(&host, &wrapper, 1), "System.Int32");
        assert_eq!(wrapper.expressions[2].member_path, "Ratio");
        assert!(wrapper.expressions.iter().all(|e| e.generate_getter && e.generate_setter));
        assert_eq!(wrapper.namespace, "Demo.Views");
        assert!(wrapper.class_name.starts_with("Main_"));
    }

    #[test]
    fn test_attached_default_and_property_elements() {
        let host = demo_host();
        let wrapper = discover(
            &host,
            &view_markup(
                r#"<TextBlock Grid.Row="{{Binding Ratio}}"/>
                   <TextBlock>{{Binding Title}}</TextBlock>
                   <TextBlock><TextBlock.Value>{{Binding Foo}}</TextBlock.Value></TextBlock>"#,
            ),
        )
        .unwrap();

        assert_eq!(wrapper.expressions.len(), 3);
        assert_eq!(type_name(&host, &wrapper, 0), "System.Int32");
        assert_eq!(wrapper.expressions[1].member_path, "Title");
        assert_eq!(type_name(&host, &wrapper, 1), "System.String");
        assert_eq!(wrapper.expressions[2].member_path, "Foo");
        assert_eq!(type_name(&host, &wrapper, 2), "System.Double");
        assert_eq!(wrapper.expressions[0].location.line, 2);
    }

    #[test]
    fn test_invalid_targets() {
        let host = demo_host();
        let kind = |body: &str| discover(&host, &view_markup(body)).unwrap_err().kind;

        assert_eq!(
            kind(r#"<TextBlock Title="{{Binding Name}}"/>"#),
            DiscoveryErrorKind::NotBindable {
                element: "TextBlock".to_string(),
                property: "Title".to_string(),
            }
        );
        assert_eq!(
            kind(r#"<Mystery Text="{{Binding Name}}"/>"#),
            DiscoveryErrorKind::UnknownElement("Mystery".to_string())
        );
        assert_eq!(
            kind(r#"<ItemsControl>{{Binding Name}}</ItemsControl>"#),
            DiscoveryErrorKind::NoDefaultProperty("ItemsControl".to_string())
        );
        assert_eq!(
            kind(r#"<TextBlock Text="{{Binding Items[0]}}"/>"#),
            DiscoveryErrorKind::BindingPath("Items[0]".to_string())
        );
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // DIRECTIVES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_directives_are_collected() {
        let host = demo_host();
        let wrapper = discover(
            &host,
            &view_markup(
                r#"<Directive Type="Import">./helpers</Directive>
                   <Directive Type="reference"> Demo.Extensions </Directive>"#,
            ),
        )
        .unwrap();
        assert_eq!(wrapper.imports, vec!["./helpers"]);
        assert_eq!(wrapper.references, vec!["Demo.Extensions"]);
    }

    #[test]
    fn test_empty_directive_value_is_rejected() {
        let host = demo_host();
        let err = discover(&host, &view_markup(r#"<Directive Type="Reference"/>"#)).unwrap_err();
        assert_eq!(err.kind, DiscoveryErrorKind::DirectiveValue("reference".to_string()));
        assert_eq!(err.code(), ERR_DIRECTIVE_VALUE);
        assert_eq!(err.file, "Main.view");
    }

    #[test]
    fn test_first_bad_directive_in_document_order_wins() {
        let host = demo_host();
        let err = discover(
            &host,
            &view_markup(
                r#"<Directive Type="Import">ok</Directive>
                   <Directive Type="Bogus">x</Directive>
                   <Directive Type="Reference"/>"#,
            ),
        )
        .unwrap_err();
        assert_eq!(err.kind, DiscoveryErrorKind::UnknownDirective("bogus".to_string()));
        assert_eq!(err.to_compiler_error().code, ERR_UNKNOWN_DIRECTIVE);
        assert_eq!(err.location.line, 3);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // VIEW MODEL TYPES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_view_model_type_must_be_assembly_qualified() {
        let host = demo_host();
        let err = discover(&host, r#"<View ViewModelType="Demo.MainViewModel"/>"#).unwrap_err();
        assert_eq!(
            err.kind,
            DiscoveryErrorKind::NotQualified("Demo.MainViewModel".to_string())
        );
        assert_eq!(err.code(), ERR_NOT_QUALIFIED);

        let err = discover(&host, "<View/>").unwrap_err();
        assert_eq!(err.kind, DiscoveryErrorKind::MissingViewModelType("View".to_string()));

        let err = discover(&host, r#"<View ViewModelType="Demo.Missing, Demo"/>"#).unwrap_err();
        assert!(matches!(err.kind, DiscoveryErrorKind::UnresolvedType(_)));

        let err = discover(&host, r#"<View ViewModelType="Demo.MainViewModel, Other"/>"#).unwrap_err();
        assert!(matches!(err.kind, DiscoveryErrorKind::UnresolvedType(_)));
    }

    #[test]
    fn test_template_regions_become_dependents() {
        let host = demo_host();
        let wrapper = discover(
            &host,
            &view_markup(
                r#"<TextBlock Text="{{Binding Name}}"/>
                   <ItemsControl>
                     <DataTemplate ViewModelType="Demo.ItemViewModel, Demo">
                       <TextBlock Text="{{Binding Label}}"/>
                     </DataTemplate>
                   </ItemsControl>"#,
            ),
        )
        .unwrap();

        assert_eq!(wrapper.expressions.len(), 1);
        assert_eq!(wrapper.dependents.len(), 1);
        let dependent = &wrapper.dependents[0];
        assert_eq!(dependent.class_name, format!("{}_Template0", wrapper.class_name));
        assert_eq!(dependent.namespace, wrapper.namespace);
        assert_eq!(host.catalog().display_name(dependent.wrapped_type), "Demo.ItemViewModel");
        assert_eq!(dependent.expressions[0].member_path, "Label");
        assert_eq!(dependent.expressions[0].property_name, "__bind_0");
        assert_eq!(wrapper.flatten().len(), 2);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // FILES & TEMPLATES
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_find_views_skips_non_views() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("pages");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("Main.view"), view_markup("")).unwrap();
        fs::write(tmp.path().join("Resources.xml"), "<Resources/>").unwrap();
        fs::write(
            tmp.path().join("Foreign.view"),
            r#"<View Provider="Other" ViewModelType="Demo.MainViewModel, Demo"/>"#,
        )
        .unwrap();
        fs::write(tmp.path().join("Broken.view"), "no markup here").unwrap();
        fs::write(tmp.path().join("notes.txt"), view_markup("")).unwrap();

        let host = demo_host();
        let config = CompilerConfig::default();
        let views = Discovery::new(&host, &config).find_views(tmp.path());
        assert_eq!(views.len(), 1);
        assert!(views[0].path.ends_with("Main.view"));
        assert!(views[0].wrapper_name.starts_with("Main_"));
    }

    #[test]
    fn test_host_templates_wrap_the_templated_control() {
        let host = demo_host().with_templates(Arc::new(InMemoryTemplates::new(vec![TemplateEntry {
            name: "ShellTemplate".to_string(),
            markup: r#"<View><TextBlock Text="{{Binding Content}}"/></View>"#.to_string(),
            templated_control: Some("Demo.Shell".to_string()),
        }])));
        let config = CompilerConfig::default();
        let discovery = Discovery::new(&host, &config);

        let templates = discovery.find_templates();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].path, "template:ShellTemplate");

        let wrapper = discovery.build_wrapper(Arc::clone(&templates[0])).unwrap();
        assert_eq!(wrapper.content_kind, Some(ContentKind::Content));
        assert_eq!(wrapper.expressions[0].member_path, "Content");
    }

    #[test]
    fn test_wrapper_names_are_sanitised_and_unique() {
        let a = unique_wrapper_name("My-View");
        let b = unique_wrapper_name("My-View");
        assert!(a.starts_with("My_View_"));
        assert_eq!(a.len(), "My_View_".len() + 8);
        assert_ne!(a, b);
        assert!(unique_wrapper_name("1st").starts_with("_1st_"));
    }
}

//! Compile-unit interchange: the decorated model arrives from the
//! front end as JSON and must validate on the way in.

use accord::{
    CompileUnit, DataType, Direction, FieldDecl, MessageDecl, MessageRole, ModelError,
    PrimitiveType, Protocol, ProtocolTree, Semantics, StructDecl, TypeContext, TypeError,
};
use assert_matches::assert_matches;

fn sample_parts() -> (ProtocolTree, TypeContext) {
    let mut ctx = TypeContext::new();
    ctx.add_struct(StructDecl {
        name: "Entry".into(),
        fields: vec![FieldDecl::new("key", DataType::Primitive(PrimitiveType::Str))],
    })
    .unwrap();
    let top = Protocol {
        name: "Store".into(),
        namespace: vec!["accord".into()],
        manager: None,
        manages: vec![],
        messages: vec![MessageDecl {
            name: "Put".into(),
            direction: Direction::Out,
            role: MessageRole::Regular,
            semantics: Semantics::Async,
            params: vec![accord::Param::new("entry", DataType::Struct("Entry".into()))],
            returns: vec![],
        }],
        transitions: vec![],
        semantics: Semantics::Async,
        toplevel: true,
    };
    (ProtocolTree::new(vec![top]), ctx)
}

fn sample_unit() -> CompileUnit {
    let (tree, ctx) = sample_parts();
    CompileUnit::new(tree, ctx).unwrap()
}

#[test]
fn units_round_trip_through_json() {
    let unit = sample_unit();
    let text = serde_json::to_string(&unit).unwrap();
    let loaded = CompileUnit::from_json(&text).unwrap();

    assert_eq!(loaded.tree(), unit.tree());
    // Resolution re-ran on load.
    assert!(loaded.context().resolved_struct("Entry").is_some());
}

#[test]
fn malformed_json_is_a_decode_error() {
    assert_matches!(
        CompileUnit::from_json("{not json"),
        Err(TypeError::Decode(_))
    );
}

#[test]
fn invalid_trees_are_rejected_on_load() {
    // A unit cannot be built around this tree, so feed the raw
    // interchange form straight to the loader.
    let (mut tree, ctx) = sample_parts();
    tree.protocols[0].toplevel = false;
    let text = serde_json::json!({ "tree": tree, "context": ctx }).to_string();
    assert_matches!(
        CompileUnit::from_json(&text),
        Err(TypeError::Model(ModelError::ToplevelCount(0)))
    );
}

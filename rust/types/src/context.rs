//! Aggregate registration and resolution.
//!
//! The front end hands over struct and union declarations by name; the
//! [`TypeContext`] owns them, computes the per-side member splits and
//! recursion indirection, and serves the resolved shapes to the codec
//! layer. The context is explicit and threaded by reference wherever
//! resolution is needed; nothing here lives in process-global state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    DataType, ModelError, ProtocolTree, ResolvedComponent, ResolvedField, ResolvedStruct,
    ResolvedUnion, Side, StructDecl, UnionDecl,
};

/// Defects found while registering or resolving aggregates, and while
/// assembling a [`CompileUnit`].
#[derive(Debug, Error)]
pub enum TypeError {
    /// Two aggregates share a name.
    #[error("duplicate aggregate `{0}`")]
    DuplicateAggregate(String),
    /// An aggregate member names an undeclared aggregate.
    #[error("`{0}` references unknown aggregate `{1}`")]
    UnknownAggregate(String, String),
    /// A member's type names a declared aggregate of the other kind.
    #[error("`{0}` references `{1}` as the wrong aggregate kind")]
    KindMismatch(String, String),
    /// A message parameter names an undeclared aggregate or protocol.
    #[error("message `{0}` references unknown type `{1}`")]
    UnknownParamType(String, String),
    /// The protocol tree failed structural validation.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The serialized compile unit could not be decoded.
    #[error("failed to decode compile unit: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Owner of all struct and union declarations in one compile unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeContext {
    structs: BTreeMap<String, StructDecl>,
    unions: BTreeMap<String, UnionDecl>,
    #[serde(skip)]
    resolved_structs: BTreeMap<String, ResolvedStruct>,
    #[serde(skip)]
    resolved_unions: BTreeMap<String, ResolvedUnion>,
}

impl TypeContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        TypeContext::default()
    }

    /// Register a struct declaration.
    ///
    /// # Errors
    ///
    /// Fails if an aggregate of either kind already uses the name.
    pub fn add_struct(&mut self, decl: StructDecl) -> Result<(), TypeError> {
        if self.structs.contains_key(&decl.name) || self.unions.contains_key(&decl.name) {
            return Err(TypeError::DuplicateAggregate(decl.name));
        }
        self.structs.insert(decl.name.clone(), decl);
        Ok(())
    }

    /// Register a union declaration.
    ///
    /// # Errors
    ///
    /// Fails if an aggregate of either kind already uses the name.
    pub fn add_union(&mut self, decl: UnionDecl) -> Result<(), TypeError> {
        if self.structs.contains_key(&decl.name) || self.unions.contains_key(&decl.name) {
            return Err(TypeError::DuplicateAggregate(decl.name));
        }
        self.unions.insert(decl.name.clone(), decl);
        Ok(())
    }

    /// Whether an aggregate with this name is registered.
    #[must_use]
    pub fn knows(&self, name: &str) -> bool {
        self.structs.contains_key(name) || self.unions.contains_key(name)
    }

    /// Compute resolved shapes for every registered aggregate.
    ///
    /// Members whose type carries a visible actor split into a parent
    /// entry followed by a child entry. Members that close a
    /// declaration cycle are marked for indirection; array members
    /// already live behind one and are never marked.
    ///
    /// # Errors
    ///
    /// Fails when a member names an undeclared aggregate or one of the
    /// wrong kind.
    pub fn resolve(&mut self) -> Result<(), TypeError> {
        for decl in self.structs.values() {
            for f in &decl.fields {
                self.check_member(&decl.name, &f.ty)?;
            }
        }
        for decl in self.unions.values() {
            for c in &decl.components {
                self.check_member(&decl.name, c)?;
            }
        }

        let mut resolved_structs = BTreeMap::new();
        for decl in self.structs.values() {
            let mut fields = Vec::new();
            for f in &decl.fields {
                let indirect = self.closes_cycle(&decl.name, &f.ty);
                if f.ty.carries_actor() {
                    for side in [Side::Parent, Side::Child] {
                        fields.push(ResolvedField {
                            name: f.name.clone(),
                            ty: f.ty.clone(),
                            side: Some(side),
                            indirect,
                        });
                    }
                } else {
                    fields.push(ResolvedField {
                        name: f.name.clone(),
                        ty: f.ty.clone(),
                        side: None,
                        indirect,
                    });
                }
            }
            resolved_structs.insert(
                decl.name.clone(),
                ResolvedStruct {
                    name: decl.name.clone(),
                    fields,
                },
            );
        }

        let mut resolved_unions = BTreeMap::new();
        for decl in self.unions.values() {
            let mut components = Vec::new();
            for (declared, ty) in decl.components.iter().enumerate() {
                let indirect = self.closes_cycle(&decl.name, ty);
                if ty.carries_actor() {
                    for side in [Side::Parent, Side::Child] {
                        components.push(ResolvedComponent {
                            declared,
                            ty: ty.clone(),
                            side: Some(side),
                            indirect,
                        });
                    }
                } else {
                    components.push(ResolvedComponent {
                        declared,
                        ty: ty.clone(),
                        side: None,
                        indirect,
                    });
                }
            }
            resolved_unions.insert(
                decl.name.clone(),
                ResolvedUnion {
                    name: decl.name.clone(),
                    components,
                },
            );
        }

        self.resolved_structs = resolved_structs;
        self.resolved_unions = resolved_unions;
        Ok(())
    }

    /// The resolved shape of a struct, once [`Self::resolve`] has run.
    #[must_use]
    pub fn resolved_struct(&self, name: &str) -> Option<&ResolvedStruct> {
        self.resolved_structs.get(name)
    }

    /// The resolved shape of a union, once [`Self::resolve`] has run.
    #[must_use]
    pub fn resolved_union(&self, name: &str) -> Option<&ResolvedUnion> {
        self.resolved_unions.get(name)
    }

    fn check_member(&self, container: &str, ty: &DataType) -> Result<(), TypeError> {
        let (name, is_struct) = match ty {
            DataType::Struct(n) => (n, true),
            DataType::Union(n) => (n, false),
            DataType::Array(elem) => return self.check_member(container, elem),
            _ => return Ok(()),
        };
        let declared_struct = self.structs.contains_key(name);
        let declared_union = self.unions.contains_key(name);
        if !declared_struct && !declared_union {
            return Err(TypeError::UnknownAggregate(
                container.to_string(),
                name.clone(),
            ));
        }
        if declared_struct != is_struct {
            return Err(TypeError::KindMismatch(container.to_string(), name.clone()));
        }
        Ok(())
    }

    /// True when `ty` directly embeds an aggregate that can reach back
    /// to `container`. Array members are excluded: the array itself
    /// breaks the cycle in storage terms.
    fn closes_cycle(&self, container: &str, ty: &DataType) -> bool {
        match ty {
            DataType::Struct(n) | DataType::Union(n) => self.reaches(n, container),
            _ => false,
        }
    }

    /// Whether `from` reaches `target` through aggregate references,
    /// arrays included. `from == target` counts as reaching.
    fn reaches(&self, from: &str, target: &str) -> bool {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from.to_string()];
        while let Some(name) = stack.pop() {
            if name == target {
                return true;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            let members: Vec<&DataType> = if let Some(s) = self.structs.get(&name) {
                s.fields.iter().map(|f| &f.ty).collect()
            } else if let Some(u) = self.unions.get(&name) {
                u.components.iter().collect()
            } else {
                continue;
            };
            for ty in members {
                if let Some(next) = ty.aggregate_name() {
                    stack.push(next.to_string());
                }
            }
        }
        false
    }
}

/// A validated protocol tree together with its resolved aggregates.
///
/// This is the unit the later stages consume; constructing one runs
/// every structural check, so holding a `CompileUnit` is proof the
/// model is well formed. The fields stay private for the same reason:
/// the only ways in are [`CompileUnit::new`] and
/// [`CompileUnit::from_json`], both of which validate.
#[derive(Debug, Clone, Serialize)]
pub struct CompileUnit {
    tree: ProtocolTree,
    context: TypeContext,
}

impl CompileUnit {
    /// Assemble and validate a compile unit.
    ///
    /// # Errors
    ///
    /// Returns the first tree or aggregate defect found, including
    /// message parameters that name undeclared aggregates or protocols.
    pub fn new(tree: ProtocolTree, mut context: TypeContext) -> Result<Self, TypeError> {
        tree.validate()?;
        context.resolve()?;

        for p in &tree.protocols {
            for md in &p.messages {
                for param in md.params.iter().chain(&md.returns) {
                    check_param(&tree, &context, &md.name, &param.ty)?;
                }
            }
        }

        Ok(CompileUnit { tree, context })
    }

    /// Decode a compile unit from its JSON interchange form and
    /// validate it.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or on any defect [`Self::new`] rejects.
    pub fn from_json(text: &str) -> Result<Self, TypeError> {
        let raw: RawUnit = serde_json::from_str(text)?;
        CompileUnit::new(raw.tree, raw.context)
    }

    /// The validated protocol tree.
    #[must_use]
    pub fn tree(&self) -> &ProtocolTree {
        &self.tree
    }

    /// The resolved aggregate declarations.
    #[must_use]
    pub fn context(&self) -> &TypeContext {
        &self.context
    }
}

#[derive(Deserialize)]
struct RawUnit {
    tree: ProtocolTree,
    context: TypeContext,
}

fn check_param(
    tree: &ProtocolTree,
    context: &TypeContext,
    message: &str,
    ty: &DataType,
) -> Result<(), TypeError> {
    match ty {
        DataType::Struct(n) | DataType::Union(n) => {
            if !context.knows(n) {
                return Err(TypeError::UnknownParamType(
                    message.to_string(),
                    n.clone(),
                ));
            }
        }
        DataType::ActorRef { protocol, .. } => {
            if tree.protocol(protocol).is_none() {
                return Err(TypeError::UnknownParamType(
                    message.to_string(),
                    protocol.clone(),
                ));
            }
        }
        DataType::Array(elem) => check_param(tree, context, message, elem)?,
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDecl, PrimitiveType};
    use assert_matches::assert_matches;

    fn int() -> DataType {
        DataType::Primitive(PrimitiveType::Int)
    }

    #[test]
    fn actor_members_split_per_side() {
        let mut ctx = TypeContext::new();
        ctx.add_struct(StructDecl {
            name: "Job".into(),
            fields: vec![
                FieldDecl::new("id", int()),
                FieldDecl::new("owner", DataType::actor("Worker")),
            ],
        })
        .unwrap();
        ctx.resolve().unwrap();

        let job = ctx.resolved_struct("Job").unwrap();
        assert_eq!(job.fields.len(), 3);
        assert_eq!(job.fields[0].side, None);
        assert_eq!(job.fields[1].side, Some(Side::Parent));
        assert_eq!(job.fields[2].side, Some(Side::Child));
        assert_eq!(job.fields[1].name, "owner");
    }

    #[test]
    fn union_wire_tags_address_the_receiver() {
        let mut ctx = TypeContext::new();
        ctx.add_union(UnionDecl {
            name: "Payload".into(),
            components: vec![int(), DataType::actor("Worker")],
        })
        .unwrap();
        ctx.resolve().unwrap();

        let u = ctx.resolved_union("Payload").unwrap();
        assert_eq!(u.components.len(), 3);
        // Plain component keeps one tag; the actor component gets a
        // parent tag and a child tag, and each writer picks the tag
        // naming the reader's representation.
        assert_eq!(u.wire_tag(0, Side::Parent), Some(0));
        assert_eq!(u.wire_tag(1, Side::Parent), Some(2));
        assert_eq!(u.wire_tag(1, Side::Child), Some(1));
    }

    #[test]
    fn mutual_recursion_is_marked_indirect() {
        let mut ctx = TypeContext::new();
        ctx.add_struct(StructDecl {
            name: "Node".into(),
            fields: vec![FieldDecl::new("next", DataType::Union("Link".into()))],
        })
        .unwrap();
        ctx.add_union(UnionDecl {
            name: "Link".into(),
            components: vec![DataType::Primitive(PrimitiveType::Unit), DataType::Struct("Node".into())],
        })
        .unwrap();
        ctx.resolve().unwrap();

        assert!(ctx.resolved_struct("Node").unwrap().fields[0].indirect);
        let link = ctx.resolved_union("Link").unwrap();
        assert!(!link.components[0].indirect);
        assert!(link.components[1].indirect);
    }

    #[test]
    fn array_members_are_not_marked_indirect() {
        let mut ctx = TypeContext::new();
        ctx.add_struct(StructDecl {
            name: "Tree".into(),
            fields: vec![FieldDecl::new(
                "children",
                DataType::array(DataType::Struct("Tree".into())),
            )],
        })
        .unwrap();
        ctx.resolve().unwrap();
        assert!(!ctx.resolved_struct("Tree").unwrap().fields[0].indirect);
    }

    #[test]
    fn unknown_member_aggregates_are_rejected() {
        let mut ctx = TypeContext::new();
        ctx.add_struct(StructDecl {
            name: "Broken".into(),
            fields: vec![FieldDecl::new("x", DataType::Struct("Missing".into()))],
        })
        .unwrap();
        assert_matches!(ctx.resolve(), Err(TypeError::UnknownAggregate(_, _)));
    }

    #[test]
    fn duplicate_aggregate_names_are_rejected_across_kinds() {
        let mut ctx = TypeContext::new();
        ctx.add_struct(StructDecl {
            name: "Thing".into(),
            fields: vec![],
        })
        .unwrap();
        assert_matches!(
            ctx.add_union(UnionDecl {
                name: "Thing".into(),
                components: vec![],
            }),
            Err(TypeError::DuplicateAggregate(_))
        );
    }
}

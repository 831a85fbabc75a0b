use quill_ast::{ContractDef, NodeId, NodeTable, SourceUnit, Type};
use tracing::debug;

use crate::clause::Relation;
use crate::error::ChcError;
use crate::solver::HornSolver;
use crate::sort::{Sort, SortMapper};
use crate::state::{SymbolicState, VariableIndices};
use crate::term::Term;

/// A storage slot tracked across function boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateVar {
    pub decl: NodeId,
    pub name: String,
    /// Contract that declares the slot; differs from the analyzed contract for inherited slots.
    pub contract: NodeId,
    pub ty: Type,
    pub sort: Sort,
}

/// The ordered state variables of one contract.
///
/// The order fixes the argument order of every relation of the contract.
/// A layout is immutable once collected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateLayout {
    vars: Vec<StateVar>,
}

impl StateLayout {
    /// Walks the inheritance chain base-first and keeps the contract's own
    /// slots plus every inherited slot visible to derived contracts.
    pub fn collect(unit: &SourceUnit, contract: &ContractDef, sorts: &dyn SortMapper) -> Self {
        let mut vars: Vec<StateVar> = Vec::new();
        for base_id in contract.linearized_bases.iter().rev() {
            let Some(base) = unit.contract(*base_id) else {
                continue;
            };
            let own = base.id == contract.id;
            for var in &base.state_variables {
                if !own && !var.visibility.is_visible_in_derived_contracts() {
                    continue;
                }
                if vars.iter().any(|v| v.decl == var.id) {
                    continue;
                }
                vars.push(StateVar {
                    decl: var.id,
                    name: var.name.node.clone(),
                    contract: base.id,
                    ty: var.ty.clone(),
                    sort: sorts.sort_of(&var.ty),
                });
            }
        }
        Self { vars }
    }

    pub fn vars(&self) -> &[StateVar] {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn sorts(&self) -> Vec<Sort> {
        self.vars.iter().map(|v| v.sort).collect()
    }

    /// Default value of every slot: the state of a freshly deployed contract.
    pub fn zero_tuple(&self) -> Vec<Term> {
        self.vars.iter().map(|v| v.sort.zero()).collect()
    }

    /// The state tuple at `indices`, as recorded for `node`.
    pub fn tuple_at(
        &self,
        state: &dyn SymbolicState,
        indices: &VariableIndices,
        node: NodeId,
    ) -> Result<Vec<Term>, ChcError> {
        self.vars
            .iter()
            .map(|var| {
                indices
                    .get(&var.decl)
                    .and_then(|index| state.variable_value(var.decl, *index))
                    .ok_or_else(|| ChcError::MissingVariableIndex {
                        name: var.name.clone(),
                        node,
                    })
            })
            .collect()
    }
}

/// Creates and caches the relations of one contract.
///
/// Every relation is registered with the solver when first created and never
/// changes afterwards. Names derive from node ids only.
#[derive(Debug)]
pub struct PredicateRegistry {
    contract: NodeId,
    layout: StateLayout,
    interface: Option<Relation>,
    error: Option<Relation>,
    constructor: Option<Relation>,
    functions: NodeTable<Relation>,
    /// Creation order.
    declared: Vec<Relation>,
}

impl PredicateRegistry {
    pub fn new(contract: NodeId, layout: StateLayout, node_count: usize) -> Self {
        Self {
            contract,
            layout,
            interface: None,
            error: None,
            constructor: None,
            functions: NodeTable::with_capacity(node_count),
            declared: Vec::new(),
        }
    }

    pub fn contract(&self) -> NodeId {
        self.contract
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn interface(&mut self, solver: &mut dyn HornSolver) -> Result<Relation, ChcError> {
        let name = format!("interface_{}", self.contract);
        let sorts = self.layout.sorts();
        intern(&mut self.interface, &mut self.declared, name, sorts, solver)
    }

    pub fn error(&mut self, solver: &mut dyn HornSolver) -> Result<Relation, ChcError> {
        let name = format!("error_{}", self.contract);
        intern(&mut self.error, &mut self.declared, name, Vec::new(), solver)
    }

    pub fn constructor(&mut self, solver: &mut dyn HornSolver) -> Result<Relation, ChcError> {
        let name = format!("constructor_{}", self.contract);
        let sorts = self.layout.sorts();
        intern(&mut self.constructor, &mut self.declared, name, sorts, solver)
    }

    pub fn intern_function(&mut self, function: NodeId, solver: &mut dyn HornSolver) -> Result<Relation, ChcError> {
        if let Some(rel) = self.functions.get(function) {
            return Ok(rel.clone());
        }
        let rel = Relation::new(format!("function_{function}"), self.layout.sorts());
        register(&mut self.declared, &rel, solver)?;
        self.functions.insert(function, rel.clone());
        Ok(rel)
    }

    /// Looks up a relation created by [`PredicateRegistry::intern_function`].
    pub fn function(&self, function: NodeId) -> Result<&Relation, ChcError> {
        self.functions
            .get(function)
            .ok_or(ChcError::MissingRelation { node: function })
    }

    pub fn relations(&self) -> &[Relation] {
        &self.declared
    }

    pub fn into_relations(self) -> Vec<Relation> {
        self.declared
    }
}

fn intern(
    slot: &mut Option<Relation>,
    declared: &mut Vec<Relation>,
    name: String,
    sorts: Vec<Sort>,
    solver: &mut dyn HornSolver,
) -> Result<Relation, ChcError> {
    if let Some(rel) = slot {
        return Ok(rel.clone());
    }
    let rel = Relation::new(name, sorts);
    register(declared, &rel, solver)?;
    *slot = Some(rel.clone());
    Ok(rel)
}

fn register(declared: &mut Vec<Relation>, rel: &Relation, solver: &mut dyn HornSolver) -> Result<(), ChcError> {
    solver.register_relation(rel)?;
    debug!(relation = %rel.name, arity = rel.arity(), "registered relation");
    declared.push(rel.clone());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::HornClause;
    use crate::solver::{QueryResult, SolverError};
    use crate::sort::DefaultSortMapper;
    use crate::term::RelationApp;
    use quill_ast::{AstBuilder, ExperimentalFeature, Visibility};

    #[derive(Default)]
    struct Registrations(Vec<String>);

    impl HornSolver for Registrations {
        fn declare_variable(&mut self, _name: &str, _sort: Sort) -> Result<(), SolverError> {
            Ok(())
        }

        fn register_relation(&mut self, relation: &Relation) -> Result<(), SolverError> {
            self.0.push(relation.name.clone());
            Ok(())
        }

        fn add_rule(&mut self, _clause: &HornClause) -> Result<(), SolverError> {
            Ok(())
        }

        fn query(&mut self, _targets: &[RelationApp]) -> Result<QueryResult, SolverError> {
            Err(SolverError::Protocol("not used".into()))
        }

        fn reset(&mut self) {
            self.0.clear();
        }
    }

    #[test]
    fn layout_keeps_own_and_visible_inherited_slots_base_first() {
        let mut b = AstBuilder::new();
        let hidden = b.state_var("hidden", Type::Uint(256), Visibility::Private);
        let shared = b.state_var("shared", Type::Bool, Visibility::Internal);
        let base = b.contract("Base", vec![hidden, shared.clone()], vec![]);
        let own = b.state_var("own", Type::Uint(8), Visibility::Private);
        let derived = b.derived_contract("Derived", &[&base], vec![own.clone()], vec![]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![base, derived.clone()]);

        let layout = StateLayout::collect(&unit, &derived, &DefaultSortMapper);
        let names: Vec<_> = layout.vars().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["shared", "own"]);
        assert_eq!(layout.sorts(), vec![Sort::Bool, Sort::Int]);
        assert_eq!(layout.zero_tuple(), vec![Term::Bool(false), Term::Int(0)]);
        assert_eq!(layout.vars()[0].contract, unit.contracts[0].id);
    }

    #[test]
    fn relations_are_created_once_and_share_the_layout_signature() {
        let mut b = AstBuilder::new();
        let x = b.state_var("x", Type::Uint(256), Visibility::Public);
        let flag = b.state_var("flag", Type::Bool, Visibility::Public);
        let f = b.function("f", vec![], vec![]);
        let c = b.contract("C", vec![x, flag], vec![f.clone()]);
        let unit = b.source_unit(&[ExperimentalFeature::SmtChecker], vec![c.clone()]);

        let layout = StateLayout::collect(&unit, &c, &DefaultSortMapper);
        let mut registry = PredicateRegistry::new(c.id, layout, unit.node_count);
        let mut solver = Registrations::default();

        let first = registry.intern_function(f.id, &mut solver).unwrap();
        let again = registry.intern_function(f.id, &mut solver).unwrap();
        let interface = registry.interface(&mut solver).unwrap();
        let error = registry.error(&mut solver).unwrap();
        registry.error(&mut solver).unwrap();

        assert_eq!(first, again);
        assert_eq!(first.arg_sorts, interface.arg_sorts);
        assert_eq!(first.name, format!("function_{}", f.id));
        assert_eq!(error.arity(), 0);
        assert_eq!(
            solver.0,
            vec![first.name.clone(), interface.name.clone(), error.name.clone()]
        );
        assert_eq!(registry.relations().len(), 3);
    }

    #[test]
    fn looking_up_an_uninterned_function_is_fatal() {
        let registry = PredicateRegistry::new(NodeId(0), StateLayout::default(), 4);
        assert!(matches!(
            registry.function(NodeId(3)),
            Err(ChcError::MissingRelation { node }) if node == NodeId(3)
        ));
    }
}

//! Named variables and constraints on top of `good_lp`.
//!
//! Expressions are plain [`good_lp::Expression`]s. The [`Model`] keeps what a `good_lp` problem does not: a name,
//! type, bounds and start value for every variable, and every constraint by name. That is enough to check a set of
//! values against the formulation, to hand the formulation to a [`Solver`](super::solve::Solver), and to write it
//! out in CPLEX-LP format for an external engine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};

use derive_more::{Deref, Display, From, Into};
use good_lp::{constraint, variable, Expression, IntoAffineExpression, ProblemVariables};
use typed_index_collections::{TiSlice, TiVec};

#[derive(Deref, Debug, PartialEq, Eq, PartialOrd, Ord, From, Into, Clone, Copy, Hash, Display)]
pub struct VarIndex(usize);

/// One (optional) value per variable of a model, as returned by a solver.
pub type Values = TiVec<VarIndex, Option<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Binary,
    Continuous,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub vtype: VarType,
    pub lb: f64,
    pub ub: f64,
    /// Start value handed to the solver, if any
    pub start: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

impl Sense {
    fn lp(&self) -> &'static str {
        match self {
            Sense::Le => "<=",
            Sense::Ge => ">=",
            Sense::Eq => "=",
        }
    }
}

/// A linear comparison normalized to `expr (sense) rhs`, where `expr` has no constant.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub expr: Expression,
    pub sense: Sense,
    pub rhs: f64,
}

impl Comparison {
    fn new(lhs: impl IntoAffineExpression, sense: Sense, rhs: impl IntoAffineExpression) -> Comparison {
        let expr = Expression::from(0.0) + lhs - rhs;
        let constant = expr.constant();
        Comparison {
            expr: expr - constant,
            sense,
            // adding zero turns a negative zero into a positive one
            rhs: -constant + 0.0,
        }
    }

    /// The comparison as a `good_lp` constraint
    pub fn to_constraint(&self) -> good_lp::Constraint {
        let expr = self.expr.clone();
        let rhs = self.rhs;
        match self.sense {
            Sense::Le => constraint!(expr <= rhs),
            Sense::Ge => constraint!(expr >= rhs),
            Sense::Eq => constraint!(expr == rhs),
        }
    }
}

/// `lhs <= rhs`
pub fn le(lhs: impl IntoAffineExpression, rhs: impl IntoAffineExpression) -> Comparison {
    Comparison::new(lhs, Sense::Le, rhs)
}

/// `lhs >= rhs`
pub fn ge(lhs: impl IntoAffineExpression, rhs: impl IntoAffineExpression) -> Comparison {
    Comparison::new(lhs, Sense::Ge, rhs)
}

/// `lhs == rhs`
pub fn eq(lhs: impl IntoAffineExpression, rhs: impl IntoAffineExpression) -> Comparison {
    Comparison::new(lhs, Sense::Eq, rhs)
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub name: String,
    pub comparison: Comparison,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ModelError {
    #[display(fmt = "variable name '{}' is already in use", _0)]
    DuplicateVariable(String),
    #[display(fmt = "constraint name '{}' is already in use", _0)]
    DuplicateConstraint(String),
    #[display(fmt = "variable {} does not belong to the model", _0)]
    UnknownVariable(VarIndex),
    #[display(fmt = "constraint '{}' uses a variable of another model", _0)]
    ForeignVariable(String),
}

impl std::error::Error for ModelError {}

/// The parts of a model a `good_lp` solver needs
pub struct LpProblem {
    pub variables: ProblemVariables,
    pub objective: Expression,
    pub constraints: Vec<good_lp::Constraint>,
    /// Start values of the variables that have one
    pub start: Vec<(good_lp::Variable, f64)>,
    /// The `good_lp` variable of every variable of the model
    pub handles: TiVec<VarIndex, good_lp::Variable>,
}

/// A minimization problem over named variables and named linear constraints
pub struct Model {
    name: String,
    problem: ProblemVariables,
    vars: TiVec<VarIndex, Variable>,
    handles: TiVec<VarIndex, good_lp::Variable>,
    lookup: HashMap<good_lp::Variable, VarIndex>,
    var_names: HashSet<String>,
    constrs: Vec<Constraint>,
    constr_lookup: HashMap<String, usize>,
    objective: Expression,
}

impl Model {
    pub fn new(name: &str) -> Model {
        Model {
            name: name.to_string(),
            problem: ProblemVariables::new(),
            vars: TiVec::new(),
            handles: TiVec::new(),
            lookup: HashMap::new(),
            var_names: HashSet::new(),
            constrs: Vec::new(),
            constr_lookup: HashMap::new(),
            objective: Expression::from(0.0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_var(&mut self, name: &str, vtype: VarType, lb: f64, ub: f64) -> Result<VarIndex, ModelError> {
        if !self.var_names.insert(name.to_string()) {
            return Err(ModelError::DuplicateVariable(name.to_string()));
        }

        let definition = match vtype {
            VarType::Binary => variable().binary(),
            VarType::Continuous if ub.is_finite() => variable().min(lb).max(ub),
            VarType::Continuous => variable().min(lb),
        };
        let handle = self.problem.add(definition.name(name.to_string()));

        let index = VarIndex::from(self.vars.len());
        self.vars.push(Variable {
            name: name.to_string(),
            vtype,
            lb,
            ub,
            start: None,
        });
        self.handles.push(handle);
        self.lookup.insert(handle, index);
        Ok(index)
    }

    /// Adds a binary variable
    pub fn add_binary(&mut self, name: &str) -> Result<VarIndex, ModelError> {
        self.add_var(name, VarType::Binary, 0.0, 1.0)
    }

    /// Adds a non-negative continuous variable
    pub fn add_cont(&mut self, name: &str) -> Result<VarIndex, ModelError> {
        self.add_var(name, VarType::Continuous, 0.0, f64::INFINITY)
    }

    /// The `good_lp` variable to build expressions with
    pub fn handle(&self, var: VarIndex) -> good_lp::Variable {
        self.handles[var]
    }

    /// `Σ coeff·var` over the given terms
    pub fn linear(&self, terms: impl IntoIterator<Item = (f64, VarIndex)>) -> Expression {
        terms
            .into_iter()
            .fold(Expression::from(0.0), |acc, (coeff, var)| acc + coeff * self.handles[var])
    }

    /// The sum of the given variables
    pub fn sum<'a>(&self, vars: impl IntoIterator<Item = &'a VarIndex>) -> Expression {
        self.linear(vars.into_iter().map(|var| (1.0, *var)))
    }

    pub fn add_constr(&mut self, name: &str, comparison: Comparison) -> Result<(), ModelError> {
        let foreign = comparison
            .expr
            .clone()
            .linear_coefficients()
            .into_iter()
            .any(|(handle, _)| !self.lookup.contains_key(&handle));
        if foreign {
            return Err(ModelError::ForeignVariable(name.to_string()));
        }
        if self.constr_lookup.contains_key(name) {
            return Err(ModelError::DuplicateConstraint(name.to_string()));
        }

        self.constr_lookup.insert(name.to_string(), self.constrs.len());
        self.constrs.push(Constraint {
            name: name.to_string(),
            comparison,
        });
        Ok(())
    }

    /// Sets the objective to minimize
    pub fn set_objective(&mut self, objective: impl IntoAffineExpression) {
        self.objective = Expression::from(0.0) + objective;
    }

    pub fn set_start(&mut self, var: VarIndex, value: f64) -> Result<(), ModelError> {
        match self.vars.get_mut(var) {
            Some(variable) => {
                variable.start = Some(value);
                Ok(())
            }
            None => Err(ModelError::UnknownVariable(var)),
        }
    }

    pub fn vars(&self) -> &TiVec<VarIndex, Variable> {
        &self.vars
    }

    pub fn var(&self, var: VarIndex) -> &Variable {
        &self.vars[var]
    }

    pub fn constrs(&self) -> &[Constraint] {
        &self.constrs
    }

    pub fn constr(&self, name: &str) -> Option<&Constraint> {
        self.constr_lookup.get(name).map(|i| &self.constrs[*i])
    }

    pub fn objective(&self) -> &Expression {
        &self.objective
    }

    /// The coefficients of an expression by variable. Variables of other models are left out.
    pub fn coefficients(&self, expr: &Expression) -> BTreeMap<VarIndex, f64> {
        expr.clone()
            .linear_coefficients()
            .into_iter()
            .filter_map(|(handle, coeff)| Some((*self.lookup.get(&handle)?, coeff)))
            .collect()
    }

    /// The value of an expression, missing values counting as zero
    pub fn evaluate(&self, expr: &Expression, values: &TiSlice<VarIndex, Option<f64>>) -> f64 {
        self.coefficients(expr)
            .into_iter()
            .map(|(var, coeff)| coeff * values.get(var).copied().flatten().unwrap_or(0.0))
            .sum::<f64>()
            + expr.constant()
    }

    /// The start values of the model, as if they were a solution
    pub fn start_values(&self) -> Values {
        self.vars.iter().map(|v| v.start).collect()
    }

    pub fn evaluate_objective(&self, values: &TiSlice<VarIndex, Option<f64>>) -> f64 {
        self.evaluate(&self.objective, values)
    }

    /// The amount by which a comparison is violated, zero if it holds
    pub fn violation(&self, comparison: &Comparison, values: &TiSlice<VarIndex, Option<f64>>) -> f64 {
        let lhs = self.evaluate(&comparison.expr, values);
        match comparison.sense {
            Sense::Le => (lhs - comparison.rhs).max(0.0),
            Sense::Ge => (comparison.rhs - lhs).max(0.0),
            Sense::Eq => (lhs - comparison.rhs).abs(),
        }
    }

    /// The constraints violated by more than `tolerance`, together with the violation
    pub fn violations<'a>(&'a self, values: &TiSlice<VarIndex, Option<f64>>, tolerance: f64) -> Vec<(&'a Constraint, f64)> {
        self.constrs
            .iter()
            .map(|c| (c, self.violation(&c.comparison, values)))
            .filter(|(_, violation)| *violation > tolerance)
            .collect()
    }

    /// Hands the model over to a `good_lp` solver
    pub fn into_lp(self) -> LpProblem {
        let constraints = self.constrs.iter().map(|c| c.comparison.to_constraint()).collect();
        let start = self
            .vars
            .iter_enumerated()
            .filter_map(|(var, v)| Some((self.handles[var], v.start?)))
            .collect();

        LpProblem {
            variables: self.problem,
            objective: self.objective,
            constraints,
            start,
            handles: self.handles,
        }
    }

    /// Writes the model in CPLEX-LP format
    pub fn write_lp<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "\\ Problem: {}", self.name)?;
        writeln!(out, "Minimize")?;
        write!(out, " obj:")?;
        self.write_terms(out, &self.objective)?;
        if self.objective.constant() != 0.0 {
            write!(out, " {:+}", self.objective.constant())?;
        }
        writeln!(out)?;

        writeln!(out, "Subject To")?;
        for constr in &self.constrs {
            let comparison = &constr.comparison;
            write!(out, " {}:", constr.name)?;
            if self.coefficients(&comparison.expr).is_empty() {
                // LP format needs at least one term on the left-hand side
                write!(out, " 0 {}", self.vars.first().map(|v| v.name.as_str()).unwrap_or("dummy"))?;
            }
            self.write_terms(out, &comparison.expr)?;
            writeln!(out, " {} {}", comparison.sense.lp(), comparison.rhs)?;
        }

        writeln!(out, "Bounds")?;
        for var in self.vars.iter().filter(|v| v.vtype == VarType::Continuous) {
            if var.ub.is_infinite() {
                writeln!(out, " {} >= {}", var.name, var.lb)?;
            } else {
                writeln!(out, " {} <= {} <= {}", var.lb, var.name, var.ub)?;
            }
        }

        writeln!(out, "Binary")?;
        for var in self.vars.iter().filter(|v| v.vtype == VarType::Binary) {
            writeln!(out, " {}", var.name)?;
        }
        writeln!(out, "End")
    }

    fn write_terms<W: Write>(&self, out: &mut W, expr: &Expression) -> io::Result<()> {
        let terms = self.coefficients(expr).into_iter().filter(|(_, coeff)| *coeff != 0.0);
        for (i, (var, coeff)) in terms.enumerate() {
            // keep lines well below the 510 character limit of the format
            if i > 0 && i % 8 == 0 {
                write!(out, "\n  ")?;
            }
            write!(out, " {:+} {}", coeff, self.vars[var].name)?;
        }
        Ok(())
    }
}

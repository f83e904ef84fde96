use std::collections::BTreeMap;
use std::ops::Range;

use typed_index_collections::{TiSlice, TiVec};

use super::milp::{Model, ModelError, VarIndex, VarType};

pub trait AddVars {
    type Out;

    /// Create a variable for any type
    fn vars(
        &self,
        model: &mut Model,
        base_name: &str,
        vtype: VarType,
        bounds: &Range<f64>,
    ) -> Result<Self::Out, ModelError>;

    /// Binary variables
    fn binary(&self, model: &mut Model, base_name: &str) -> Result<Self::Out, ModelError> {
        self.vars(model, base_name, VarType::Binary, &(0.0..1.0))
    }

    /// A continuous non-negative variable
    fn cont(&self, model: &mut Model, base_name: &str) -> Result<Self::Out, ModelError> {
        self.vars(model, base_name, VarType::Continuous, &(0.0..f64::INFINITY))
    }
}

impl AddVars for usize {
    type Out = Vec<VarIndex>;

    fn vars(
        &self,
        model: &mut Model,
        base_name: &str,
        vtype: VarType,
        bounds: &Range<f64>,
    ) -> Result<Self::Out, ModelError> {
        let mut vec = Vec::with_capacity(*self);
        for i in 0..*self {
            vec.push(model.add_var(
                &format!("{}_{}", base_name, i),
                vtype,
                bounds.start,
                bounds.end,
            )?);
        }

        Ok(vec)
    }
}

/// Creates one variable per index, named by `name`
pub fn vars<K: Ord>(
    indices: impl IntoIterator<Item = K>,
    model: &mut Model,
    vtype: VarType,
    bounds: &Range<f64>,
    name: impl Fn(&K) -> String,
) -> Result<BTreeMap<K, VarIndex>, ModelError> {
    let mut out = BTreeMap::new();
    for index in indices {
        let var = model.add_var(&name(&index), vtype, bounds.start, bounds.end)?;
        out.insert(index, var);
    }

    Ok(out)
}

/// Trait that converts variables to their values in a solution. Missing values count as zero.
pub trait ConvertVars {
    type Out;
    fn convert(&self, values: &TiSlice<VarIndex, Option<f64>>) -> Self::Out;
}

impl ConvertVars for VarIndex {
    type Out = f64;

    fn convert(&self, values: &TiSlice<VarIndex, Option<f64>>) -> Self::Out {
        values.get(*self).copied().flatten().unwrap_or(0.0)
    }
}

impl<T: ConvertVars> ConvertVars for Vec<T> {
    type Out = Vec<T::Out>;

    fn convert(&self, values: &TiSlice<VarIndex, Option<f64>>) -> Self::Out {
        self.iter().map(|e| e.convert(values)).collect()
    }
}

impl<K, T: ConvertVars> ConvertVars for TiVec<K, T> {
    type Out = TiVec<K, T::Out>;

    fn convert(&self, values: &TiSlice<VarIndex, Option<f64>>) -> Self::Out {
        self.iter().map(|e| e.convert(values)).collect()
    }
}

impl<K: Ord + Clone, T: ConvertVars> ConvertVars for BTreeMap<K, T> {
    type Out = BTreeMap<K, T::Out>;

    fn convert(&self, values: &TiSlice<VarIndex, Option<f64>>) -> Self::Out {
        self.iter()
            .map(|(k, e)| (k.clone(), e.convert(values)))
            .collect()
    }
}

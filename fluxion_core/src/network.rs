//! This module provides the stoichiometric network description consumed by
//! the flux constraint system.

use indexmap::IndexMap;
use nalgebra::DMatrix;
use thiserror::Error;

/// Immutable stoichiometric network
///
/// Rows of the matrix are metabolites (pools), columns are reactions
/// (fluxes). Coefficients are exact integers.
///
/// # Examples
/// ```rust
/// use fluxion_core::network::Network;
/// let network = Network::new(
///     vec!["A".to_string()],
///     vec!["v1".to_string(), "v2".to_string()],
///     vec![
///         ("A".to_string(), "v1".to_string(), 1),
///         ("A".to_string(), "v2".to_string(), -1),
///     ],
/// )
/// .unwrap();
/// assert_eq!(network.num_reactions(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Network {
    /// Stoichiometric coefficients, metabolites by reactions
    stoichiometry: DMatrix<i64>,
    /// Reaction id to column index
    reactions: IndexMap<String, usize>,
    /// Metabolite id to row index
    metabolites: IndexMap<String, usize>,
}

impl Network {
    /// Build a network from named metabolites, reactions, and coefficient triplets
    ///
    /// # Parameters
    /// - `metabolites`: metabolite ids, one per matrix row (must be unique)
    /// - `reactions`: reaction ids, one per matrix column (must be unique)
    /// - `coefficients`: (metabolite id, reaction id, coefficient) triplets;
    ///   coefficients for the same cell are summed
    ///
    /// # Returns
    /// The assembled [`Network`], or a [`NetworkError`] naming the offending id
    pub fn new(
        metabolites: Vec<String>,
        reactions: Vec<String>,
        coefficients: Vec<(String, String, i64)>,
    ) -> Result<Network, NetworkError> {
        let mut metabolite_map: IndexMap<String, usize> = IndexMap::new();
        for (index, id) in metabolites.into_iter().enumerate() {
            if metabolite_map.insert(id.clone(), index).is_some() {
                return Err(NetworkError::DuplicateMetabolite(id));
            }
        }
        let mut reaction_map: IndexMap<String, usize> = IndexMap::new();
        for (index, id) in reactions.into_iter().enumerate() {
            if reaction_map.insert(id.clone(), index).is_some() {
                return Err(NetworkError::DuplicateReaction(id));
            }
        }
        let mut stoichiometry = DMatrix::zeros(metabolite_map.len(), reaction_map.len());
        for (metabolite, reaction, value) in coefficients {
            let row = *metabolite_map
                .get(&metabolite)
                .ok_or(NetworkError::UnknownMetabolite(metabolite))?;
            let col = *reaction_map
                .get(&reaction)
                .ok_or(NetworkError::UnknownReaction(reaction))?;
            stoichiometry[(row, col)] += value;
        }
        Ok(Network {
            stoichiometry,
            reactions: reaction_map,
            metabolites: metabolite_map,
        })
    }

    pub fn num_reactions(&self) -> usize {
        self.reactions.len()
    }

    pub fn num_metabolites(&self) -> usize {
        self.metabolites.len()
    }

    pub fn stoichiometry(&self) -> &DMatrix<i64> {
        &self.stoichiometry
    }

    pub fn reaction_index(&self, id: &str) -> Option<usize> {
        self.reactions.get(id).copied()
    }

    pub fn metabolite_index(&self, id: &str) -> Option<usize> {
        self.metabolites.get(id).copied()
    }

    /// Reaction id for a column index
    pub fn reaction_name(&self, index: usize) -> Option<&str> {
        self.reactions
            .get_index(index)
            .map(|(id, _)| id.as_str())
    }

    /// Metabolite id for a row index
    pub fn metabolite_name(&self, index: usize) -> Option<&str> {
        self.metabolites
            .get_index(index)
            .map(|(id, _)| id.as_str())
    }

    pub fn reaction_names(&self) -> Vec<String> {
        self.reactions.keys().cloned().collect()
    }

    pub fn metabolite_names(&self) -> Vec<String> {
        self.metabolites.keys().cloned().collect()
    }
}

/// Errors raised while assembling a network
#[derive(Debug, Error, PartialEq)]
pub enum NetworkError {
    #[error("duplicate metabolite id: {0}")]
    DuplicateMetabolite(String),
    #[error("duplicate reaction id: {0}")]
    DuplicateReaction(String),
    #[error("unknown metabolite id in coefficient list: {0}")]
    UnknownMetabolite(String),
    #[error("unknown reaction id in coefficient list: {0}")]
    UnknownReaction(String),
}

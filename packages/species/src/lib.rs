#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Species token resolution.
//!
//! A submitted species is either a numeric species id or an
//! `"<accepted_symbol>,<cultivar>"` pair where the cultivar may be blank
//! (`"QUAL,"`). Several species rows can share an accepted symbol, so a
//! pair may match more than one row; [`AmbiguityPolicy`] decides what
//! happens then.

use thiserror::Error;
use tree_map_config::AmbiguityPolicy;
use tree_map_database::{SpeciesStore, StoreError};
use tree_map_tree_models::SpeciesId;

/// Errors that can occur while resolving a species token.
#[derive(Debug, Error)]
pub enum SpeciesError {
    /// The token is neither an id nor a `symbol,cultivar` pair.
    #[error("{token:?} is not a species id or a \"symbol,cultivar\" pair")]
    MalformedInput {
        /// Token as submitted.
        token: String,
    },

    /// No species matches the token.
    #[error("{token:?} is an invalid species")]
    NotFound {
        /// Token as submitted.
        token: String,
    },

    /// The token matches several species and the policy refuses to pick.
    #[error("{token:?} matches {} species", .candidates.len())]
    AmbiguousInput {
        /// Token as submitted.
        token: String,
        /// Matching species ids, ascending.
        candidates: Vec<SpeciesId>,
    },

    /// The species store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A syntactically valid species token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeciesToken {
    /// A species primary key.
    Id(SpeciesId),
    /// An accepted symbol with an optional cultivar filter.
    Symbol {
        /// Accepted USDA symbol.
        accepted_symbol: String,
        /// Cultivar name; `None` when the cultivar part was blank.
        cultivar: Option<String>,
    },
}

impl SpeciesToken {
    /// Parses a raw token. Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SpeciesError::MalformedInput`] for a token without a
    /// comma, with more than one comma, or with an empty symbol.
    pub fn parse(raw: &str) -> Result<Self, SpeciesError> {
        let token = raw.trim();
        let malformed = || SpeciesError::MalformedInput {
            token: raw.to_string(),
        };

        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            return token
                .parse::<i64>()
                .map(|id| Self::Id(SpeciesId(id)))
                .map_err(|_| malformed());
        }

        let (symbol, cultivar) = token.split_once(',').ok_or_else(malformed)?;
        if cultivar.contains(',') {
            return Err(malformed());
        }

        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(malformed());
        }

        let cultivar = cultivar.trim();
        Ok(Self::Symbol {
            accepted_symbol: symbol.to_string(),
            cultivar: (!cultivar.is_empty()).then(|| cultivar.to_string()),
        })
    }
}

/// Resolves species tokens against a [`SpeciesStore`].
pub struct SpeciesResolver<'a, S: SpeciesStore + ?Sized> {
    store: &'a S,
    policy: AmbiguityPolicy,
}

impl<'a, S: SpeciesStore + ?Sized> SpeciesResolver<'a, S> {
    /// Creates a resolver reading from `store`.
    #[must_use]
    pub const fn new(store: &'a S, policy: AmbiguityPolicy) -> Self {
        Self { store, policy }
    }

    /// Resolves a token to a species id.
    ///
    /// `current` is the species already bound to the tree being edited,
    /// if any. A numeric token equal to it is returned without a lookup.
    ///
    /// # Errors
    ///
    /// * [`SpeciesError::MalformedInput`] if the token cannot be parsed
    /// * [`SpeciesError::NotFound`] if no species matches
    /// * [`SpeciesError::AmbiguousInput`] if several match under
    ///   [`AmbiguityPolicy::Reject`]
    /// * [`SpeciesError::Store`] if the lookup fails
    pub async fn resolve(
        &self,
        raw: &str,
        current: Option<SpeciesId>,
    ) -> Result<SpeciesId, SpeciesError> {
        let not_found = || SpeciesError::NotFound {
            token: raw.to_string(),
        };

        match SpeciesToken::parse(raw)? {
            SpeciesToken::Id(id) if Some(id) == current => Ok(id),
            SpeciesToken::Id(id) => self
                .store
                .species_by_id(id)
                .await?
                .map(|species| species.id)
                .ok_or_else(not_found),
            SpeciesToken::Symbol {
                accepted_symbol,
                cultivar,
            } => {
                let mut candidates: Vec<SpeciesId> = self
                    .store
                    .species_by_accepted_symbol(&accepted_symbol)
                    .await?
                    .into_iter()
                    .filter(|species| {
                        cultivar
                            .as_deref()
                            .is_none_or(|c| species.cultivar_name.as_deref() == Some(c))
                    })
                    .map(|species| species.id)
                    .collect();
                candidates.sort();

                match candidates.as_slice() {
                    [] => Err(not_found()),
                    [only] => Ok(*only),
                    [first, ..] => match self.policy {
                        AmbiguityPolicy::FirstMatch => {
                            log::warn!(
                                "Species token {raw:?} matches {} rows, using species {first}",
                                candidates.len()
                            );
                            Ok(*first)
                        }
                        AmbiguityPolicy::Reject => Err(SpeciesError::AmbiguousInput {
                            token: raw.to_string(),
                            candidates,
                        }),
                    },
                }
            }
        }
    }
}

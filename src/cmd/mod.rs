pub mod correlations;
pub mod inspect;
pub mod refine;
pub mod update;

// Domain layer - Core value types and business rules

pub mod model;
pub mod rules;

pub(crate) mod exams;
pub(crate) mod health;
#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod postgres;
pub(crate) mod results;
pub(crate) mod sessions;
pub(crate) mod store;
pub(crate) mod violations;

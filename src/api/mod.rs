pub(crate) mod channel;
pub(crate) mod errors;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod results;
pub(crate) mod router;
pub(crate) mod sessions;
pub(crate) mod validation;

#[cfg(test)]
mod tests;

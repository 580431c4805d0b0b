mod exec;
mod module;

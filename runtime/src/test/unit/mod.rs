mod cache;
mod compiler;
mod disk;
mod jit;
mod launcher;

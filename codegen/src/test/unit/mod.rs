mod binary;
mod emit;
mod lower;

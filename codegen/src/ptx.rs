//! PTX emission for CUDA targets.
//!
//! Each thread of a program holds `ceil(len / threads)` lanes of every block value;
//! instructions on blocks are emitted once and annotated with their lane count.
//! Reductions use a butterfly shuffle ladder inside the warp and stage per-warp
//! partials in shared memory when a block spans several warps.

use std::collections::BTreeMap;
use std::fmt::Write;

use kiln_dtype::{CudaCapability, DType, ScalarDType};
use kiln_ir::CompileOptions;

use crate::analysis::ResourceUsage;
use crate::kir::{BinaryOp, CacheModifier, Imm, Inst, Kernel, ReduceOp, Shape, UnaryOp, ValueId};

/// PTX ISA version emitted for a compute capability.
fn isa_version(cap: &CudaCapability) -> &'static str {
    match cap.major {
        0..=7 => "7.0",
        8 => "7.8",
        _ => "8.3",
    }
}

fn type_suffix(dtype: DType) -> &'static str {
    match dtype {
        DType::Ptr { .. } => "u64",
        DType::Scalar(s) => match s {
            ScalarDType::Bool => "pred",
            ScalarDType::Int8 => "s8",
            ScalarDType::UInt8 => "u8",
            ScalarDType::Int16 => "s16",
            ScalarDType::UInt16 => "u16",
            ScalarDType::Int32 => "s32",
            ScalarDType::UInt32 => "u32",
            ScalarDType::Int64 => "s64",
            ScalarDType::UInt64 => "u64",
            ScalarDType::Float16 => "f16",
            ScalarDType::BFloat16 => "bf16",
            ScalarDType::Float32 => "f32",
            ScalarDType::Float64 => "f64",
        },
    }
}

/// Untyped register width suffix used by moves and shuffles.
fn bits_suffix(dtype: DType) -> &'static str {
    match dtype.bytes() {
        1 | 2 => "b16",
        4 => "b32",
        _ => "b64",
    }
}

/// Register class prefix and declaration type.
fn reg_class(dtype: DType) -> (&'static str, &'static str) {
    match dtype {
        DType::Ptr { .. } => ("%rd", ".b64"),
        DType::Scalar(ScalarDType::Bool) => ("%p", ".pred"),
        DType::Scalar(ScalarDType::Float32) => ("%f", ".f32"),
        DType::Scalar(ScalarDType::Float64) => ("%fd", ".f64"),
        DType::Scalar(s) if s.bytes() <= 2 => ("%rs", ".b16"),
        DType::Scalar(s) if s.bytes() == 8 => ("%rd", ".b64"),
        DType::Scalar(_) => ("%r", ".b32"),
    }
}

fn immediate(dtype: DType, imm: Imm) -> String {
    match dtype.scalar() {
        Some(ScalarDType::Float32) => format!("0f{:08X}", (imm.as_f64() as f32).to_bits()),
        Some(ScalarDType::Float64) => format!("0d{:016X}", imm.as_f64().to_bits()),
        Some(ScalarDType::Float16) => format!("0x{:04X}", half::f16::from_f64(imm.as_f64()).to_bits()),
        Some(ScalarDType::BFloat16) => format!("0x{:04X}", half::bf16::from_f64(imm.as_f64()).to_bits()),
        Some(ScalarDType::Bool) => format!("{}", (imm.as_i64() != 0) as i32),
        _ => format!("{}", imm.as_i64()),
    }
}

fn axis_name(axis: u8) -> char {
    ['x', 'y', 'z'][axis.min(2) as usize]
}

fn cache_suffix(cache: CacheModifier) -> &'static str {
    match cache {
        CacheModifier::Default => "",
        CacheModifier::CacheAll => ".ca",
        CacheModifier::CacheGlobal => ".cg",
        CacheModifier::Streaming => ".cs",
        CacheModifier::EvictFirst => ".L1::evict_first",
        CacheModifier::EvictLast => ".L1::evict_last",
    }
}

struct Emitter<'k> {
    kernel: &'k Kernel,
    out: String,
    regs: Vec<String>,
    counters: BTreeMap<&'static str, (u32, &'static str)>,
    threads: u32,
}

impl<'k> Emitter<'k> {
    fn fresh(&mut self, dtype: DType) -> String {
        let (prefix, decl) = reg_class(dtype);
        let entry = self.counters.entry(prefix).or_insert((0, decl));
        entry.0 += 1;
        format!("{prefix}{}", entry.0)
    }

    fn reg(&self, id: ValueId) -> &str {
        self.regs.get(id as usize).map_or("%invalid", String::as_str)
    }

    fn dtype(&self, id: ValueId) -> DType {
        self.kernel.ty(id).map_or(DType::Bool, |ty| ty.dtype)
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.out.push('\t');
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    fn lanes_comment(&self, shape: Shape) -> String {
        match shape {
            Shape::Scalar => String::new(),
            Shape::Block(len) => format!("\t// x{}", len.div_ceil(self.threads)),
        }
    }

    fn node(&mut self, id: ValueId) {
        let kernel = self.kernel;
        let node = &kernel.nodes[id as usize];
        let dst = node.ty.map(|ty| self.fresh(ty.dtype)).unwrap_or_default();
        let lanes = node.ty.map(|ty| self.lanes_comment(ty.shape)).unwrap_or_default();
        let ty = node.ty.map_or(DType::Bool, |ty| ty.dtype);
        let t = type_suffix(ty);

        match &node.inst {
            Inst::Param(index) => {
                let name = &kernel.name;
                self.line(format!("ld.param.{t} {dst}, [{name}_param_{index}];"));
                if ty.is_ptr() {
                    self.line(format!("cvta.to.global.u64 {dst}, {dst};"));
                }
            }
            Inst::Const(imm) if ty.is_bool() => {
                let value = if imm.as_i64() != 0 { "1" } else { "0" };
                self.line(format!("setp.ne.u32 {dst}, {value}, 0;"));
            }
            Inst::Const(imm) => self.line(format!("mov.{} {dst}, {};", bits_suffix(ty), immediate(ty, *imm))),
            Inst::ProgramId(axis) => self.line(format!("mov.u32 {dst}, %ctaid.{};", axis_name(*axis))),
            Inst::NumPrograms(axis) => self.line(format!("mov.u32 {dst}, %nctaid.{};", axis_name(*axis))),
            Inst::Arange(start) => {
                self.line(format!("mov.u32 {dst}, %tid.x;{lanes}"));
                if *start != 0 {
                    self.line(format!("add.s32 {dst}, {dst}, {start};{lanes}"));
                }
            }
            Inst::Splat(src) => {
                let src = self.reg(*src).to_string();
                self.line(format!("mov.{} {dst}, {src};{lanes}", if ty.is_bool() { "pred" } else { bits_suffix(ty) }));
            }
            Inst::Binary(op, a, b) => {
                let operand_ty = self.dtype(*a);
                let ot = type_suffix(operand_ty);
                let (a, b) = (self.reg(*a).to_string(), self.reg(*b).to_string());
                let is_float = operand_ty.is_float();
                let text = match op {
                    BinaryOp::Add => format!("add.{ot} {dst}, {a}, {b};"),
                    BinaryOp::Sub => format!("sub.{ot} {dst}, {a}, {b};"),
                    BinaryOp::Mul if is_float => format!("mul.rn.{ot} {dst}, {a}, {b};"),
                    BinaryOp::Mul => format!("mul.lo.{ot} {dst}, {a}, {b};"),
                    BinaryOp::Div if is_float => format!("div.rn.{ot} {dst}, {a}, {b};"),
                    BinaryOp::Div => format!("div.{ot} {dst}, {a}, {b};"),
                    BinaryOp::Rem => format!("rem.{ot} {dst}, {a}, {b};"),
                    BinaryOp::Min => format!("min.{ot} {dst}, {a}, {b};"),
                    BinaryOp::Max => format!("max.{ot} {dst}, {a}, {b};"),
                    BinaryOp::And if operand_ty.is_bool() => format!("and.pred {dst}, {a}, {b};"),
                    BinaryOp::Or if operand_ty.is_bool() => format!("or.pred {dst}, {a}, {b};"),
                    BinaryOp::Xor if operand_ty.is_bool() => format!("xor.pred {dst}, {a}, {b};"),
                    BinaryOp::And => format!("and.{} {dst}, {a}, {b};", bits_suffix(operand_ty)),
                    BinaryOp::Or => format!("or.{} {dst}, {a}, {b};", bits_suffix(operand_ty)),
                    BinaryOp::Xor => format!("xor.{} {dst}, {a}, {b};", bits_suffix(operand_ty)),
                    BinaryOp::Shl => format!("shl.{} {dst}, {a}, {b};", bits_suffix(operand_ty)),
                    BinaryOp::Shr => format!("shr.{ot} {dst}, {a}, {b};"),
                    cmp => {
                        let op = match cmp {
                            BinaryOp::Lt => "lt",
                            BinaryOp::Le => "le",
                            BinaryOp::Gt => "gt",
                            BinaryOp::Ge => "ge",
                            BinaryOp::Eq => "eq",
                            _ => "ne",
                        };
                        format!("setp.{op}.{ot} {dst}, {a}, {b};")
                    }
                };
                self.line(format!("{text}{lanes}"));
            }
            Inst::Unary(op, a) => {
                let a = self.reg(*a).to_string();
                match op {
                    UnaryOp::Neg => self.line(format!("neg.{t} {dst}, {a};{lanes}")),
                    UnaryOp::Not if ty.is_bool() => self.line(format!("not.pred {dst}, {a};{lanes}")),
                    UnaryOp::Not => self.line(format!("not.{} {dst}, {a};{lanes}", bits_suffix(ty))),
                    UnaryOp::Abs => self.line(format!("abs.{t} {dst}, {a};{lanes}")),
                    UnaryOp::Sqrt => self.line(format!("sqrt.rn.{t} {dst}, {a};{lanes}")),
                    UnaryOp::Exp => {
                        self.line(format!("mul.{t} {dst}, {a}, 0f3FB8AA3B;{lanes}"));
                        self.line(format!("ex2.approx.{t} {dst}, {dst};{lanes}"));
                    }
                    UnaryOp::Log => {
                        self.line(format!("lg2.approx.{t} {dst}, {a};{lanes}"));
                        self.line(format!("mul.{t} {dst}, {dst}, 0f3F317218;{lanes}"));
                    }
                }
            }
            Inst::Select(c, a, b) => {
                let (c, a, b) = (self.reg(*c).to_string(), self.reg(*a).to_string(), self.reg(*b).to_string());
                let suffix = if ty.is_bool() { "pred" } else { bits_suffix(ty) };
                self.line(format!("selp.{suffix} {dst}, {a}, {b}, {c};{lanes}"));
            }
            Inst::Cast(src) => {
                let from = self.dtype(*src);
                let src = self.reg(*src).to_string();
                let text = match (from, ty) {
                    (f, _) if f.is_bool() => format!("selp.{t} {dst}, 1, 0, {src};"),
                    (_, to) if to.is_bool() => format!("setp.ne.{} {dst}, {src}, 0;", type_suffix(from)),
                    (f, to) if f.is_float() && to.is_float() && f.bytes() > to.bytes() => {
                        format!("cvt.rn.{t}.{} {dst}, {src};", type_suffix(f))
                    }
                    (f, to) if f.is_float() && to.is_float() => format!("cvt.{t}.{} {dst}, {src};", type_suffix(f)),
                    (f, _) if f.is_float() => format!("cvt.rzi.sat.{t}.{} {dst}, {src};", type_suffix(f)),
                    (f, to) if to.is_float() => format!("cvt.rn.{t}.{} {dst}, {src};", type_suffix(f)),
                    (f, _) => format!("cvt.{t}.{} {dst}, {src};", type_suffix(f)),
                };
                self.line(format!("{text}{lanes}"));
            }
            Inst::PtrAdd(p, offset) => {
                let elem = ty.base().bytes();
                let offset_ty = self.dtype(*offset);
                let (p, offset) = (self.reg(*p).to_string(), self.reg(*offset).to_string());
                let wide = self.fresh(DType::ptr(ScalarDType::UInt8));
                if offset_ty.bytes() == 8 {
                    self.line(format!("mul.lo.s64 {wide}, {offset}, {elem};{lanes}"));
                } else {
                    self.line(format!("mul.wide.{} {wide}, {offset}, {elem};{lanes}", type_suffix(offset_ty)));
                }
                self.line(format!("add.s64 {dst}, {p}, {wide};{lanes}"));
            }
            Inst::Load { ptr, mask, other, cache } => {
                let ptr = self.reg(*ptr).to_string();
                if let Some(other) = other {
                    let other = self.reg(*other).to_string();
                    self.line(format!("mov.{} {dst}, {other};{lanes}", bits_suffix(ty)));
                }
                let guard = mask.map(|m| format!("@{} ", self.reg(m))).unwrap_or_default();
                self.line(format!("{guard}ld.global{}.{t} {dst}, [{ptr}];{lanes}", cache_suffix(*cache)));
            }
            Inst::Store { ptr, value, mask, cache } => {
                let store_ty = self.dtype(*value);
                let ptr_shape = kernel.ty(*ptr).map_or(Shape::Scalar, |ty| ty.shape);
                let lanes = self.lanes_comment(ptr_shape);
                let (ptr, value) = (self.reg(*ptr).to_string(), self.reg(*value).to_string());
                let guard = mask.map(|m| format!("@{} ", self.reg(m))).unwrap_or_default();
                self.line(format!(
                    "{guard}st.global{}.{} [{ptr}], {value};{lanes}",
                    cache_suffix(*cache),
                    type_suffix(store_ty)
                ));
            }
            Inst::Reduce(op, src) => self.reduce(*op, *src, &dst),
        }
        self.regs.push(dst);
    }

    fn reduce(&mut self, op: ReduceOp, src: ValueId, dst: &str) {
        let ty = self.kernel.ty(src).map_or(DType::Float32, |ty| ty.dtype);
        let len = self.kernel.ty(src).map_or(1, |ty| ty.shape.len());
        let t = type_suffix(ty);
        let bits = bits_suffix(ty);
        let combine = match op {
            ReduceOp::Sum => "add",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        };
        let src = self.reg(src).to_string();
        let lanes = len.div_ceil(self.threads);

        self.line(format!("mov.{bits} {dst}, {src};"));
        if lanes > 1 {
            self.line(format!("// fold {lanes} lanes per thread"));
            self.line(format!("{combine}.{t} {dst}, {dst}, {src};\t// x{}", lanes - 1));
        }

        let tmp = self.fresh(ty);
        let active = len.min(32);
        let mut offset = active / 2;
        while offset >= 1 {
            self.line(format!("shfl.sync.bfly.{bits} {tmp}, {dst}, {offset}, 0x1f, 0xffffffff;"));
            self.line(format!("{combine}.{t} {dst}, {dst}, {tmp};"));
            offset /= 2;
        }

        let warps = self.threads / 32;
        if len > 32 && warps > 1 {
            let warp = self.fresh(DType::Int32);
            let addr = self.fresh(DType::Int32);
            let pred = self.fresh(DType::Bool);
            let bytes = ty.bytes().max(4);
            self.line("mov.u32 %tx, %tid.x;");
            self.line(format!("shr.u32 {warp}, %tx, 5;"));
            self.line(format!("mul.lo.u32 {addr}, {warp}, {bytes};"));
            self.line("and.b32 %tx, %tx, 31;");
            self.line(format!("setp.eq.u32 {pred}, %tx, 0;"));
            self.line(format!("@{pred} st.shared.{t} [__smem + {addr}], {dst};"));
            self.line("bar.sync 0;");
            self.line(format!("ld.shared.{t} {dst}, [__smem];"));
            for w in 1..warps {
                self.line(format!("ld.shared.{t} {tmp}, [__smem + {}];", w as usize * bytes));
                self.line(format!("{combine}.{t} {dst}, {dst}, {tmp};"));
            }
            self.line("bar.sync 0;");
        }
    }
}

pub fn emit(kernel: &Kernel, cap: &CudaCapability, options: &CompileOptions, usage: &ResourceUsage) -> String {
    let mut emitter = Emitter {
        kernel,
        out: String::new(),
        regs: Vec::with_capacity(kernel.nodes.len()),
        counters: BTreeMap::new(),
        threads: usage.threads.max(1),
    };
    for id in 0..kernel.nodes.len() {
        emitter.node(id as ValueId);
    }
    emitter.line("ret;");

    let arch = cap.arch_name();
    let mut text = String::new();
    // Writing into a String never fails.
    let _ = writeln!(text, "//\n// Generated by kiln for {arch}\n//\n");
    let _ = writeln!(text, ".version {}", isa_version(cap));
    let _ = writeln!(text, ".target {arch}");
    let _ = writeln!(text, ".address_size 64\n");
    if usage.shared_mem > 0 {
        let _ = writeln!(text, ".shared .align 16 .b8 __smem[{}];\n", usage.shared_mem);
    }
    let _ = writeln!(text, ".visible .entry {}(", kernel.name);
    for (i, param) in kernel.params.iter().enumerate() {
        let sep = if i + 1 == kernel.params.len() { "" } else { "," };
        let decl = match (param.dtype, param.divisible_by) {
            (DType::Ptr { .. }, Some(align)) => format!(".param .u64 .ptr .global .align {align}"),
            (DType::Ptr { .. }, None) => ".param .u64 .ptr .global".to_string(),
            (dtype, _) => format!(".param .{}", type_suffix(dtype).replace("pred", "u8")),
        };
        let _ = writeln!(text, "\t{decl} {}_param_{i}{sep}\t// {}: {}", kernel.name, param.name, param.dtype);
    }
    let _ = writeln!(text, ")");
    let _ = writeln!(text, ".maxntid {}, 1, 1", usage.threads);
    let _ = writeln!(text, "// registers: {}, num_warps: {}", usage.registers, options.num_warps);
    let _ = writeln!(text, "{{");
    let _ = writeln!(text, "\t.reg .b32 \t%tx;");
    for (prefix, (count, decl)) in &emitter.counters {
        let _ = writeln!(text, "\t.reg {decl} \t{prefix}<{}>;", count + 1);
    }
    text.push('\n');
    text.push_str(&emitter.out);
    text.push_str("}\n");
    text
}

//! AMDGCN assembly emission for ROCm targets.
//!
//! Scalars live in SGPRs and blocks in VGPRs. Masked memory accesses save and
//! restore `exec`; reductions walk a swizzle ladder inside each row of 32 lanes
//! and cross the halves of a wave64 with `ds_permute_b32`.

use std::fmt::Write;

use kiln_dtype::{DType, RocmCapability, ScalarDType};
use kiln_ir::CompileOptions;

use crate::analysis::ResourceUsage;
use crate::kir::{BinaryOp, CacheModifier, Imm, Inst, Kernel, ReduceOp, Shape, UnaryOp, ValueId};

/// `ds_swizzle_b32` butterfly patterns for xor masks 16, 8, 4, 2 and 1.
const SWIZZLE_LADDER: [(u32, u32); 5] = [(16, 0x401F), (8, 0x201F), (4, 0x101F), (2, 0x081F), (1, 0x041F)];

/// Kernel argument segment starts after the hidden dispatch pointer.
const KERNARG_BASE: u32 = 0;

fn suffix(dtype: DType) -> &'static str {
    match dtype {
        DType::Ptr { .. } => "u64",
        DType::Scalar(s) => match s {
            ScalarDType::Bool => "b32",
            ScalarDType::Int8 | ScalarDType::Int16 | ScalarDType::Int32 => "i32",
            ScalarDType::UInt8 | ScalarDType::UInt16 | ScalarDType::UInt32 => "u32",
            ScalarDType::Int64 => "i64",
            ScalarDType::UInt64 => "u64",
            ScalarDType::Float16 | ScalarDType::BFloat16 => "f16",
            ScalarDType::Float32 => "f32",
            ScalarDType::Float64 => "f64",
        },
    }
}

/// Memory width suffix of global loads and stores.
fn memory_suffix(dtype: DType) -> &'static str {
    match dtype.bytes() {
        1 if dtype.is_signed() => "sbyte",
        1 => "ubyte",
        2 if dtype.is_signed() => "sshort",
        2 => "ushort",
        4 => "dword",
        _ => "dwordx2",
    }
}

fn store_suffix(dtype: DType) -> &'static str {
    match dtype.bytes() {
        1 => "byte",
        2 => "short",
        4 => "dword",
        _ => "dwordx2",
    }
}

fn cache_bits(cache: CacheModifier) -> &'static str {
    match cache {
        CacheModifier::Default | CacheModifier::CacheAll | CacheModifier::EvictLast => "",
        CacheModifier::CacheGlobal => " glc",
        CacheModifier::Streaming | CacheModifier::EvictFirst => " glc slc",
    }
}

fn immediate(dtype: DType, imm: Imm) -> String {
    match dtype.scalar() {
        Some(ScalarDType::Float32) => format!("0x{:08x}", (imm.as_f64() as f32).to_bits()),
        Some(ScalarDType::Float64) => format!("0x{:016x}", imm.as_f64().to_bits()),
        Some(ScalarDType::Float16) => format!("0x{:04x}", half::f16::from_f64(imm.as_f64()).to_bits()),
        Some(ScalarDType::BFloat16) => format!("0x{:04x}", half::bf16::from_f64(imm.as_f64()).to_bits()),
        _ => format!("{}", imm.as_i64()),
    }
}

struct Emitter<'k> {
    kernel: &'k Kernel,
    out: String,
    regs: Vec<String>,
    sgprs: u32,
    vgprs: u32,
    threads: u32,
    wave: u32,
}

impl<'k> Emitter<'k> {
    fn fresh(&mut self, ty: Option<(DType, Shape)>) -> String {
        let Some((dtype, shape)) = ty else {
            return String::new();
        };
        let words = dtype.bytes().div_ceil(4) as u32;
        match shape {
            Shape::Scalar => {
                // 64-bit SGPR pairs are even aligned.
                let base = if words == 2 { self.sgprs.next_multiple_of(2) } else { self.sgprs };
                self.sgprs = base + words;
                if words == 2 { format!("s[{}:{}]", base, base + 1) } else { format!("s{base}") }
            }
            Shape::Block(len) => {
                let lanes = len.div_ceil(self.threads);
                let base = self.vgprs;
                self.vgprs += words * lanes;
                if words * lanes > 1 { format!("v[{}:{}]", base, base + words * lanes - 1) } else { format!("v{base}") }
            }
        }
    }

    fn reg(&self, id: ValueId) -> &str {
        self.regs.get(id as usize).map_or("v_invalid", String::as_str)
    }

    fn line(&mut self, text: impl AsRef<str>) {
        self.out.push('\t');
        self.out.push_str(text.as_ref());
        self.out.push('\n');
    }

    /// `s_` for uniform values, `v_` otherwise.
    fn unit(shape: Shape) -> &'static str {
        if shape.is_block() { "v" } else { "s" }
    }

    fn with_mask(&mut self, mask: Option<ValueId>, body: impl FnOnce(&mut Self)) {
        match mask {
            Some(mask) => {
                let mask = self.reg(mask).to_string();
                self.line("s_mov_b64 s[100:101], exec");
                self.line(format!("s_and_b64 exec, exec, {mask}"));
                body(self);
                self.line("s_mov_b64 exec, s[100:101]");
            }
            None => body(self),
        }
    }

    fn node(&mut self, id: ValueId) {
        let kernel = self.kernel;
        let node = &kernel.nodes[id as usize];
        let dst = self.fresh(node.ty.map(|ty| (ty.dtype, ty.shape)));
        let ty = node.ty.map_or(DType::Bool, |ty| ty.dtype);
        let shape = node.ty.map_or(Shape::Scalar, |ty| ty.shape);
        let unit = Self::unit(shape);
        let t = suffix(ty);

        match &node.inst {
            Inst::Param(index) => {
                let offset = KERNARG_BASE + 8 * index;
                let width = if ty.bytes() == 8 { "x2" } else { "" };
                self.line(format!("s_load_dword{width} {dst}, s[4:5], 0x{offset:x}"));
                self.line("s_waitcnt lgkmcnt(0)");
            }
            Inst::Const(imm) => {
                let width = if ty.bytes() == 8 { "b64" } else { "b32" };
                self.line(format!("s_mov_{width} {dst}, {}", immediate(ty, *imm)));
            }
            Inst::ProgramId(axis) => self.line(format!("s_mov_b32 {dst}, s{}", 6 + *axis as u32)),
            Inst::NumPrograms(axis) => {
                self.line(format!("s_load_dword {dst}, s[4:5], 0x{:x}", 0xc + 4 * *axis as u32));
                self.line("s_waitcnt lgkmcnt(0)");
            }
            Inst::Arange(start) => {
                self.line(format!("v_mov_b32 {dst}, v0"));
                if *start != 0 {
                    self.line(format!("v_add_u32 {dst}, {dst}, {start}"));
                }
            }
            Inst::Splat(src) => {
                let src = self.reg(*src).to_string();
                let width = if ty.bytes() == 8 { "b64" } else { "b32" };
                self.line(format!("v_mov_{width} {dst}, {src}"));
            }
            Inst::Binary(op, a, b) => {
                let operand = kernel.ty(*a).map_or(DType::Int32, |ty| ty.dtype);
                let ot = suffix(operand);
                let (a, b) = (self.reg(*a).to_string(), self.reg(*b).to_string());
                let text = match op {
                    BinaryOp::Add => format!("{unit}_add_{ot} {dst}, {a}, {b}"),
                    BinaryOp::Sub => format!("{unit}_sub_{ot} {dst}, {a}, {b}"),
                    BinaryOp::Mul if operand.is_float() => format!("v_mul_{ot} {dst}, {a}, {b}"),
                    BinaryOp::Mul => format!("{unit}_mul_lo_{ot} {dst}, {a}, {b}"),
                    BinaryOp::Div if operand.is_float() => format!("v_div_scale_{ot} {dst}, vcc, {a}, {b}, {a}"),
                    BinaryOp::Div => format!("v_div_{ot} {dst}, {a}, {b}\t; expanded"),
                    BinaryOp::Rem => format!("v_rem_{ot} {dst}, {a}, {b}\t; expanded"),
                    BinaryOp::Min => format!("{unit}_min_{ot} {dst}, {a}, {b}"),
                    BinaryOp::Max => format!("{unit}_max_{ot} {dst}, {a}, {b}"),
                    BinaryOp::And => format!("{unit}_and_b32 {dst}, {a}, {b}"),
                    BinaryOp::Or => format!("{unit}_or_b32 {dst}, {a}, {b}"),
                    BinaryOp::Xor => format!("{unit}_xor_b32 {dst}, {a}, {b}"),
                    BinaryOp::Shl => format!("{unit}_lshl_b32 {dst}, {a}, {b}"),
                    BinaryOp::Shr if operand.is_signed() => format!("{unit}_ashr_i32 {dst}, {a}, {b}"),
                    BinaryOp::Shr => format!("{unit}_lshr_b32 {dst}, {a}, {b}"),
                    cmp => {
                        let cc = match cmp {
                            BinaryOp::Lt => "lt",
                            BinaryOp::Le => "le",
                            BinaryOp::Gt => "gt",
                            BinaryOp::Ge => "ge",
                            BinaryOp::Eq => "eq",
                            _ => "ne",
                        };
                        if shape.is_block() {
                            format!("v_cmp_{cc}_{ot} {dst}, {a}, {b}")
                        } else {
                            format!("s_cmp_{cc}_{ot} {a}, {b}\n\ts_cselect_b32 {dst}, 1, 0")
                        }
                    }
                };
                self.line(text);
            }
            Inst::Unary(op, a) => {
                let a = self.reg(*a).to_string();
                let text = match op {
                    UnaryOp::Neg if ty.is_float() => format!("v_xor_b32 {dst}, 0x80000000, {a}"),
                    UnaryOp::Neg => format!("{unit}_sub_{t} {dst}, 0, {a}"),
                    UnaryOp::Not => format!("{unit}_not_b32 {dst}, {a}"),
                    UnaryOp::Abs if ty.is_float() => format!("v_and_b32 {dst}, 0x7fffffff, {a}"),
                    UnaryOp::Abs => format!("{unit}_abs_i32 {dst}, {a}"),
                    UnaryOp::Sqrt => format!("v_sqrt_{t} {dst}, {a}"),
                    UnaryOp::Exp => format!("v_mul_{t} {dst}, 0x3fb8aa3b, {a}\n\tv_exp_{t} {dst}, {dst}"),
                    UnaryOp::Log => format!("v_log_{t} {dst}, {a}\n\tv_mul_{t} {dst}, 0x3f317218, {dst}"),
                };
                self.line(text);
            }
            Inst::Select(c, a, b) => {
                let (c, a, b) = (self.reg(*c).to_string(), self.reg(*a).to_string(), self.reg(*b).to_string());
                if shape.is_block() {
                    self.line(format!("v_cndmask_b32 {dst}, {b}, {a}, {c}"));
                } else {
                    self.line(format!("s_cmp_lg_u32 {c}, 0"));
                    self.line(format!("s_cselect_b32 {dst}, {a}, {b}"));
                }
            }
            Inst::Cast(src) => {
                let from = kernel.ty(*src).map_or(DType::Int32, |ty| ty.dtype);
                let src = self.reg(*src).to_string();
                let text = if from == ty || (from.bytes() == ty.bytes() && from.is_int() && ty.is_int()) {
                    format!("{unit}_mov_b32 {dst}, {src}")
                } else if ty.is_bool() {
                    format!("v_cmp_ne_{} {dst}, 0, {src}", suffix(from))
                } else if from.is_bool() {
                    format!("v_cndmask_b32 {dst}, 0, 1, {src}")
                } else {
                    format!("v_cvt_{t}_{} {dst}, {src}", suffix(from))
                };
                self.line(text);
            }
            Inst::PtrAdd(p, offset) => {
                let elem = ty.base().bytes();
                let (p, offset) = (self.reg(*p).to_string(), self.reg(*offset).to_string());
                self.line(format!("{unit}_mad_u64_u32 {dst}, {offset}, {elem}, {p}"));
            }
            Inst::Load { ptr, mask, other, cache } => {
                let ptr = self.reg(*ptr).to_string();
                if let Some(other) = other {
                    let other = self.reg(*other).to_string();
                    self.line(format!("v_mov_b32 {dst}, {other}"));
                }
                let text = if shape.is_block() {
                    format!("global_load_{} {dst}, {ptr}, off{}", memory_suffix(ty), cache_bits(*cache))
                } else {
                    format!("s_load_dword {dst}, {ptr}, 0x0{}", cache_bits(*cache))
                };
                self.with_mask(*mask, |e| {
                    e.line(text);
                    e.line("s_waitcnt vmcnt(0) lgkmcnt(0)");
                });
            }
            Inst::Store { ptr, value, mask, cache } => {
                let dtype = kernel.ty(*value).map_or(DType::Int32, |ty| ty.dtype);
                let (ptr, value) = (self.reg(*ptr).to_string(), self.reg(*value).to_string());
                let text = format!("global_store_{} {ptr}, {value}, off{}", store_suffix(dtype), cache_bits(*cache));
                self.with_mask(*mask, |e| e.line(text));
            }
            Inst::Reduce(op, src) => self.reduce(*op, *src, &dst),
        }
        self.regs.push(dst);
    }

    fn reduce(&mut self, op: ReduceOp, src: ValueId, dst: &str) {
        let ty = self.kernel.ty(src).map_or(DType::Float32, |ty| ty.dtype);
        let len = self.kernel.ty(src).map_or(1, |ty| ty.shape.len());
        let t = suffix(ty);
        let combine = match op {
            ReduceOp::Sum => "add",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        };
        let src = self.reg(src).to_string();
        let acc = self.fresh(Some((ty, Shape::Block(self.threads))));
        let tmp = self.fresh(Some((ty, Shape::Block(self.threads))));

        self.line(format!("v_mov_b32 {acc}, {src}"));
        let lanes = len.div_ceil(self.threads);
        if lanes > 1 {
            self.line(format!("; fold {lanes} lanes per thread"));
        }
        for (stride, pattern) in SWIZZLE_LADDER {
            if stride >= len.min(32) {
                continue;
            }
            self.line(format!("ds_swizzle_b32 {tmp}, {acc} offset:0x{pattern:04X}"));
            self.line("s_waitcnt lgkmcnt(0)");
            self.line(format!("v_{combine}_{t} {acc}, {acc}, {tmp}"));
        }
        if self.wave == 64 && len > 32 {
            self.line(format!("v_xor_b32 {tmp}, 0x80, v0"));
            self.line(format!("ds_permute_b32 {tmp}, {tmp}, {acc}"));
            self.line("s_waitcnt lgkmcnt(0)");
            self.line(format!("v_{combine}_{t} {acc}, {acc}, {tmp}"));
        }
        let waves = self.threads / self.wave;
        if len > self.wave && waves > 1 {
            let bytes = ty.bytes().max(4);
            let addr = self.fresh(Some((DType::Int32, Shape::Block(self.threads))));
            self.line(format!("v_mov_b32 {addr}, 0"));
            self.line(format!("v_lshrrev_b32 {tmp}, {}, v0", self.wave.trailing_zeros()));
            self.line(format!("v_mul_u32_u24 {tmp}, {bytes}, {tmp}"));
            self.line(format!("ds_write_b32 {tmp}, {acc}"));
            self.line("s_waitcnt lgkmcnt(0)");
            self.line("s_barrier");
            for w in 1..waves {
                self.line(format!("ds_read_b32 {tmp}, {addr} offset:{}", w as usize * bytes));
                self.line("s_waitcnt lgkmcnt(0)");
                self.line(format!("v_{combine}_{t} {acc}, {acc}, {tmp}"));
            }
            self.line("s_barrier");
        }
        self.line(format!("v_readfirstlane_b32 {dst}, {acc}"));
    }
}

pub fn emit(kernel: &Kernel, cap: &RocmCapability, options: &CompileOptions, usage: &ResourceUsage) -> String {
    let wave = if cap.is_rdna() { 32 } else { 64 };
    let mut emitter = Emitter {
        kernel,
        out: String::new(),
        regs: Vec::with_capacity(kernel.nodes.len()),
        // s[0:3] resource descriptor, s[4:5] kernarg pointer, s6..s8 workgroup ids.
        sgprs: 9,
        // v0 holds the local thread id.
        vgprs: 1,
        threads: usage.threads.max(1),
        wave,
    };
    for id in 0..kernel.nodes.len() {
        emitter.node(id as ValueId);
    }
    emitter.line("s_endpgm");

    let name = &kernel.name;
    let arch = &cap.arch;
    let mut text = String::new();
    // Writing into a String never fails.
    let _ = writeln!(text, "; Generated by kiln for {arch}");
    let _ = writeln!(text, ".amdgcn_target \"amdgcn-amd-amdhsa--{arch}\"");
    if cap.mfma_version() > 0 {
        let _ = writeln!(text, "; mfma version {}", cap.mfma_version());
    }
    let _ = writeln!(text, ".text");
    let _ = writeln!(text, ".globl {name}");
    let _ = writeln!(text, ".p2align 8");
    let _ = writeln!(text, ".type {name},@function");
    for (i, param) in kernel.params.iter().enumerate() {
        let align = param.divisible_by.map(|a| format!(" align {a}")).unwrap_or_default();
        let _ = writeln!(text, "; arg {i}: {} {}{align} @ 0x{:x}", param.name, param.dtype, 8 * i);
    }
    let _ = writeln!(text, "{name}:");
    text.push_str(&emitter.out);
    let _ = writeln!(text, ".Lfunc_end0:");
    let _ = writeln!(text, ".size {name}, .Lfunc_end0-{name}\n");
    let _ = writeln!(text, ".rodata");
    let _ = writeln!(text, ".p2align 6");
    let _ = writeln!(text, ".amdhsa_kernel {name}");
    let _ = writeln!(text, "\t.amdhsa_group_segment_fixed_size {}", usage.shared_mem);
    let _ = writeln!(text, "\t.amdhsa_kernarg_size {}", 8 * kernel.params.len());
    let _ = writeln!(text, "\t.amdhsa_user_sgpr_kernarg_segment_ptr 1");
    let _ = writeln!(text, "\t.amdhsa_next_free_vgpr {}", emitter.vgprs.max(usage.registers.min(256)));
    let _ = writeln!(text, "\t.amdhsa_next_free_sgpr {}", emitter.sgprs.max(16));
    let _ = writeln!(text, "\t.amdhsa_wavefront_size32 {}", (wave == 32) as u8);
    let _ = writeln!(text, ".end_amdhsa_kernel");
    let _ = writeln!(text, "; num_warps: {}, threads: {}", options.num_warps, usage.threads);
    text
}

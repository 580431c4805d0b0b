//! Loadable kernel image container.
//!
//! Layout (little endian):
//!
//! ```text
//! magic[4] version:u16 arch:str entry:str num_warps:u32 shared_mem:u32 registers:u32
//! params:u32 { name:str dtype divisible_by:u32 }
//! nodes:u32  { opcode:u8 ty operands... line:u32 col:u32 }
//! asm:str
//! ```
//!
//! Strings are length prefixed (`u32`). The encoding is a pure function of its
//! input, so identical kernels always produce identical bytes.

use kiln_dtype::{AddrSpace, DType, ScalarDType};
use kiln_ir::Span;
use snafu::OptionExt;

use crate::error::{DecodeSnafu, Result};
use crate::kir::{BinaryOp, CacheModifier, Imm, Inst, Kernel, Node, ParamInfo, ReduceOp, Shape, Ty, UnaryOp, ValueId};

pub const CUBIN_MAGIC: [u8; 4] = *b"KCBN";
pub const HSACO_MAGIC: [u8; 4] = *b"KHSA";
pub const VERSION: u16 = 1;

/// Decoded kernel image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub magic: [u8; 4],
    pub arch: String,
    pub num_warps: u32,
    pub shared_mem: u32,
    pub registers: u32,
    pub kernel: Kernel,
    pub asm: String,
}

impl Image {
    pub fn entry(&self) -> &str {
        &self.kernel.name
    }
}

mod op {
    pub const PARAM: u8 = 0;
    pub const CONST_INT: u8 = 1;
    pub const CONST_FLOAT: u8 = 2;
    pub const PROGRAM_ID: u8 = 3;
    pub const NUM_PROGRAMS: u8 = 4;
    pub const ARANGE: u8 = 5;
    pub const SPLAT: u8 = 6;
    pub const BINARY: u8 = 7;
    pub const UNARY: u8 = 8;
    pub const SELECT: u8 = 9;
    pub const CAST: u8 = 10;
    pub const PTR_ADD: u8 = 11;
    pub const LOAD: u8 = 12;
    pub const STORE: u8 = 13;
    pub const REDUCE: u8 = 14;
}

const NONE: u32 = u32::MAX;

struct Writer(Vec<u8>);

impl Writer {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }
    fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.0.extend_from_slice(s.as_bytes());
    }
    fn opt(&mut self, v: Option<u32>) {
        self.u32(v.unwrap_or(NONE));
    }
    fn dtype(&mut self, dtype: DType) {
        match dtype {
            DType::Scalar(s) => {
                self.u8(0);
                self.u8(s as u8);
            }
            DType::Ptr { base, addrspace } => {
                self.u8(1 + addrspace as u8);
                self.u8(base as u8);
            }
        }
    }
    fn ty(&mut self, ty: Option<Ty>) {
        match ty {
            None => self.u8(0xff),
            Some(ty) => {
                self.dtype(ty.dtype);
                self.u32(match ty.shape {
                    Shape::Scalar => 0,
                    Shape::Block(n) => n,
                });
            }
        }
    }
}

/// Serialize a kernel and its assembly into an image.
pub fn encode(magic: [u8; 4], arch: &str, num_warps: u32, shared_mem: u32, registers: u32, kernel: &Kernel, asm: &str) -> Vec<u8> {
    let mut w = Writer(Vec::with_capacity(256 + kernel.nodes.len() * 16 + asm.len()));
    w.0.extend_from_slice(&magic);
    w.u16(VERSION);
    w.str(arch);
    w.str(&kernel.name);
    w.u32(num_warps);
    w.u32(shared_mem);
    w.u32(registers);

    w.u32(kernel.params.len() as u32);
    for param in &kernel.params {
        w.str(&param.name);
        w.dtype(param.dtype);
        w.opt(param.divisible_by);
    }

    w.u32(kernel.nodes.len() as u32);
    for node in &kernel.nodes {
        match &node.inst {
            Inst::Param(index) => {
                w.u8(op::PARAM);
                w.ty(node.ty);
                w.u32(*index);
            }
            Inst::Const(Imm::Int(v)) => {
                w.u8(op::CONST_INT);
                w.ty(node.ty);
                w.u64(*v as u64);
            }
            Inst::Const(Imm::Float(v)) => {
                w.u8(op::CONST_FLOAT);
                w.ty(node.ty);
                w.u64(v.to_bits());
            }
            Inst::ProgramId(axis) => {
                w.u8(op::PROGRAM_ID);
                w.ty(node.ty);
                w.u8(*axis);
            }
            Inst::NumPrograms(axis) => {
                w.u8(op::NUM_PROGRAMS);
                w.ty(node.ty);
                w.u8(*axis);
            }
            Inst::Arange(start) => {
                w.u8(op::ARANGE);
                w.ty(node.ty);
                w.u64(*start as u64);
            }
            Inst::Splat(a) => {
                w.u8(op::SPLAT);
                w.ty(node.ty);
                w.u32(*a);
            }
            Inst::Binary(bop, a, b) => {
                w.u8(op::BINARY);
                w.ty(node.ty);
                w.u8(*bop as u8);
                w.u32(*a);
                w.u32(*b);
            }
            Inst::Unary(uop, a) => {
                w.u8(op::UNARY);
                w.ty(node.ty);
                w.u8(*uop as u8);
                w.u32(*a);
            }
            Inst::Select(c, a, b) => {
                w.u8(op::SELECT);
                w.ty(node.ty);
                w.u32(*c);
                w.u32(*a);
                w.u32(*b);
            }
            Inst::Cast(a) => {
                w.u8(op::CAST);
                w.ty(node.ty);
                w.u32(*a);
            }
            Inst::PtrAdd(p, offset) => {
                w.u8(op::PTR_ADD);
                w.ty(node.ty);
                w.u32(*p);
                w.u32(*offset);
            }
            Inst::Load { ptr, mask, other, cache } => {
                w.u8(op::LOAD);
                w.ty(node.ty);
                w.u32(*ptr);
                w.opt(*mask);
                w.opt(*other);
                w.u8(*cache as u8);
            }
            Inst::Store { ptr, value, mask, cache } => {
                w.u8(op::STORE);
                w.ty(node.ty);
                w.u32(*ptr);
                w.u32(*value);
                w.opt(*mask);
                w.u8(*cache as u8);
            }
            Inst::Reduce(rop, a) => {
                w.u8(op::REDUCE);
                w.ty(node.ty);
                w.u8(*rop as u8);
                w.u32(*a);
            }
        }
        w.u32(node.span.line);
        w.u32(node.span.col);
    }

    w.str(asm);
    w.0
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len());
        let end = end.context(DecodeSnafu { reason: format!("truncated at offset {}", self.pos) })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }
    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }
    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }
    fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok().context(DecodeSnafu { reason: "string is not utf-8" })
    }
    fn opt(&mut self) -> Result<Option<u32>> {
        let v = self.u32()?;
        Ok((v != NONE).then_some(v))
    }
    fn scalar(&mut self) -> Result<ScalarDType> {
        let tag = self.u8()?;
        ScalarDType::from_repr(tag.into()).context(DecodeSnafu { reason: format!("unknown scalar type {tag}") })
    }
    fn dtype_with_tag(&mut self, tag: u8) -> Result<DType> {
        let base = self.scalar()?;
        match tag {
            0 => Ok(DType::Scalar(base)),
            1 => Ok(DType::Ptr { base, addrspace: AddrSpace::Global }),
            2 => Ok(DType::Ptr { base, addrspace: AddrSpace::Shared }),
            _ => DecodeSnafu { reason: format!("unknown type tag {tag}") }.fail(),
        }
    }
    fn dtype(&mut self) -> Result<DType> {
        let tag = self.u8()?;
        self.dtype_with_tag(tag)
    }
    fn ty(&mut self) -> Result<Option<Ty>> {
        let tag = self.u8()?;
        if tag == 0xff {
            return Ok(None);
        }
        let dtype = self.dtype_with_tag(tag)?;
        let shape = match self.u32()? {
            0 => Shape::Scalar,
            n => Shape::Block(n),
        };
        Ok(Some(Ty { dtype, shape }))
    }
    fn value(&mut self, defined: usize) -> Result<ValueId> {
        let id = self.u32()?;
        if id as usize >= defined {
            return DecodeSnafu { reason: format!("node {defined} refers to undefined value {id}") }.fail();
        }
        Ok(id)
    }
    fn opt_value(&mut self, defined: usize) -> Result<Option<ValueId>> {
        match self.opt()? {
            Some(id) if id as usize >= defined => {
                DecodeSnafu { reason: format!("node {defined} refers to undefined value {id}") }.fail()
            }
            other => Ok(other),
        }
    }
}

fn decode_node(r: &mut Reader<'_>, defined: usize) -> Result<Node> {
    let opcode = r.u8()?;
    let ty = r.ty()?;
    let inst = match opcode {
        op::PARAM => Inst::Param(r.u32()?),
        op::CONST_INT => Inst::Const(Imm::Int(r.u64()? as i64)),
        op::CONST_FLOAT => Inst::Const(Imm::Float(f64::from_bits(r.u64()?))),
        op::PROGRAM_ID => Inst::ProgramId(r.u8()?),
        op::NUM_PROGRAMS => Inst::NumPrograms(r.u8()?),
        op::ARANGE => Inst::Arange(r.u64()? as i64),
        op::SPLAT => Inst::Splat(r.value(defined)?),
        op::BINARY => {
            let code = r.u8()?;
            let bop = BinaryOp::from_repr(code).context(DecodeSnafu { reason: format!("unknown binary op {code}") })?;
            Inst::Binary(bop, r.value(defined)?, r.value(defined)?)
        }
        op::UNARY => {
            let code = r.u8()?;
            let uop = UnaryOp::from_repr(code).context(DecodeSnafu { reason: format!("unknown unary op {code}") })?;
            Inst::Unary(uop, r.value(defined)?)
        }
        op::SELECT => Inst::Select(r.value(defined)?, r.value(defined)?, r.value(defined)?),
        op::CAST => Inst::Cast(r.value(defined)?),
        op::PTR_ADD => Inst::PtrAdd(r.value(defined)?, r.value(defined)?),
        op::LOAD => {
            let ptr = r.value(defined)?;
            let mask = r.opt_value(defined)?;
            let other = r.opt_value(defined)?;
            let code = r.u8()?;
            let cache = CacheModifier::from_repr(code).context(DecodeSnafu { reason: format!("unknown cache modifier {code}") })?;
            Inst::Load { ptr, mask, other, cache }
        }
        op::STORE => {
            let ptr = r.value(defined)?;
            let value = r.value(defined)?;
            let mask = r.opt_value(defined)?;
            let code = r.u8()?;
            let cache = CacheModifier::from_repr(code).context(DecodeSnafu { reason: format!("unknown cache modifier {code}") })?;
            Inst::Store { ptr, value, mask, cache }
        }
        op::REDUCE => {
            let code = r.u8()?;
            let rop = ReduceOp::from_repr(code).context(DecodeSnafu { reason: format!("unknown reduction {code}") })?;
            Inst::Reduce(rop, r.value(defined)?)
        }
        other => return DecodeSnafu { reason: format!("unknown opcode {other}") }.fail(),
    };
    if ty.is_none() != matches!(inst, Inst::Store { .. }) {
        return DecodeSnafu { reason: format!("node {defined} has an inconsistent type") }.fail();
    }
    let span = Span { line: r.u32()?, col: r.u32()? };
    Ok(Node { inst, ty, span })
}

/// Parse an image produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Image> {
    let mut r = Reader { bytes, pos: 0 };
    let magic = r.array::<4>()?;
    if magic != CUBIN_MAGIC && magic != HSACO_MAGIC {
        return DecodeSnafu { reason: format!("bad magic {magic:02x?}") }.fail();
    }
    let version = r.u16()?;
    if version != VERSION {
        return DecodeSnafu { reason: format!("unsupported version {version}") }.fail();
    }
    let arch = r.str()?;
    let name = r.str()?;
    let num_warps = r.u32()?;
    let shared_mem = r.u32()?;
    let registers = r.u32()?;

    let param_count = r.u32()? as usize;
    let mut params = Vec::with_capacity(param_count.min(1024));
    for _ in 0..param_count {
        let name = r.str()?;
        let dtype = r.dtype()?;
        let divisible_by = r.opt()?;
        params.push(ParamInfo { name, dtype, divisible_by });
    }

    let node_count = r.u32()? as usize;
    let mut nodes = Vec::with_capacity(node_count.min(1 << 16));
    for defined in 0..node_count {
        nodes.push(decode_node(&mut r, defined)?);
    }

    let asm = r.str()?;
    if r.pos != bytes.len() {
        return DecodeSnafu { reason: format!("{} trailing bytes", bytes.len() - r.pos) }.fail();
    }
    Ok(Image { magic, arch, num_warps, shared_mem, registers, kernel: Kernel { name, params, nodes }, asm })
}

//! Mock collaborators shared by the integration tests: an instruction
//! numbering service over a fixed block layout, an operand table, and a
//! scripted coalescer.

#![allow(dead_code)]

use cranelift_entity::EntityRef;
use live_intervals::reginfo::{
    CoalescerPair, LaneBitmask, OperandId, RegClass, RegInfo, SubRegIndex, VirtReg,
};
use live_intervals::slot_index::{Block, Inst, Slot, SlotIndex, SlotIndexes};

/// Register slot of instruction `i`.
pub fn r(i: usize) -> SlotIndex {
    Inst::new(i).slot(Slot::Register)
}

/// Early-clobber slot of instruction `i`.
pub fn e(i: usize) -> SlotIndex {
    Inst::new(i).slot(Slot::Early)
}

/// Block boundary slot before instruction `i`.
pub fn b(i: usize) -> SlotIndex {
    Inst::new(i).slot(Slot::Block)
}

/// Dead slot of instruction `i`.
pub fn d(i: usize) -> SlotIndex {
    Inst::new(i).slot(Slot::Dead)
}

/// Slot index service over a fixed list of `[from, to)` instruction ranges,
/// one per block, with explicit predecessor lists.
pub struct MockIndexes {
    blocks: Vec<(usize, usize)>,
    preds: Vec<Vec<Block>>,
}

impl MockIndexes {
    pub fn new(blocks: &[(usize, usize)]) -> Self {
        Self {
            blocks: blocks.to_vec(),
            preds: vec![Vec::new(); blocks.len()],
        }
    }

    pub fn set_preds(&mut self, block: usize, preds: &[usize]) {
        self.preds[block] = preds.iter().map(|&p| Block::new(p)).collect();
    }
}

impl SlotIndexes for MockIndexes {
    fn instruction_index(&self, inst: Inst) -> SlotIndex {
        inst.slot(Slot::Block)
    }

    fn index_before(&self, inst: Inst) -> SlotIndex {
        inst.slot(Slot::Block).prev_slot()
    }

    fn block_from_index(&self, pos: SlotIndex) -> Block {
        let i = pos.inst().index();
        let block = self
            .blocks
            .iter()
            .position(|&(from, to)| i >= from && i < to)
            .expect("index outside any block");
        Block::new(block)
    }

    fn block_end(&self, block: Block) -> SlotIndex {
        b(self.blocks[block.index()].1)
    }

    fn instruction_from_index(&self, pos: SlotIndex) -> Option<Inst> {
        let i = pos.inst().index();
        self.blocks
            .iter()
            .any(|&(from, to)| i >= from && i < to)
            .then(|| pos.inst())
    }

    fn block_preds(&self, block: Block) -> &[Block] {
        &self.preds[block.index()]
    }
}

/// Coalescer that declares a fixed set of instructions coalescable.
pub struct MockCoalescer {
    coalescable: Vec<Inst>,
}

impl MockCoalescer {
    pub fn new(insts: &[usize]) -> Self {
        Self {
            coalescable: insts.iter().map(|&i| Inst::new(i)).collect(),
        }
    }
}

impl CoalescerPair for MockCoalescer {
    fn is_coalescable(&self, inst: Inst) -> bool {
        self.coalescable.contains(&inst)
    }
}

/// One entry of the mock operand table.
#[derive(Clone)]
pub struct MockOperand {
    pub reg: VirtReg,
    pub inst: Inst,
    pub sub_reg: Option<SubRegIndex>,
    pub is_def: bool,
    pub reads: bool,
    pub early_clobber: bool,
    pub undef: bool,
    pub dead: bool,
    pub debug: bool,
}

impl MockOperand {
    pub fn def(reg: usize, inst: usize) -> Self {
        Self {
            reg: VirtReg::new(reg),
            inst: Inst::new(inst),
            sub_reg: None,
            is_def: true,
            reads: false,
            early_clobber: false,
            undef: false,
            dead: false,
            debug: false,
        }
    }

    pub fn read(reg: usize, inst: usize) -> Self {
        Self {
            is_def: false,
            reads: true,
            ..Self::def(reg, inst)
        }
    }

    pub fn sub(mut self, sub_reg: usize) -> Self {
        self.sub_reg = Some(SubRegIndex::new(sub_reg));
        self
    }

    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }
}

/// Operand table plus register bookkeeping implementing [`RegInfo`].
pub struct MockRegs {
    pub operands: Vec<MockOperand>,
    /// Lane mask per subregister index.
    pub subreg_masks: Vec<u32>,
    /// Maximum lane mask, shared by all registers of the mock.
    pub max_mask: u32,
    next_vreg: usize,
    /// Instruction at which an implicit def lands, per block.
    implicit_def_insts: Vec<Option<usize>>,
    /// Every implicit def inserted through the trait, in order.
    pub inserted_implicit_defs: Vec<(Block, VirtReg, SlotIndex)>,
}

impl MockRegs {
    pub fn new(num_vregs: usize, operands: Vec<MockOperand>) -> Self {
        Self {
            operands,
            subreg_masks: vec![],
            max_mask: u32::MAX,
            next_vreg: num_vregs,
            implicit_def_insts: vec![],
            inserted_implicit_defs: vec![],
        }
    }

    pub fn with_lanes(mut self, subreg_masks: &[u32], max_mask: u32) -> Self {
        self.subreg_masks = subreg_masks.to_vec();
        self.max_mask = max_mask;
        self
    }

    /// Plans the insertion point an implicit def in `block` will get.
    pub fn plan_implicit_def(&mut self, block: usize, inst: usize) {
        if self.implicit_def_insts.len() <= block {
            self.implicit_def_insts.resize(block + 1, None);
        }
        self.implicit_def_insts[block] = Some(inst);
    }

    pub fn operand_reg(&self, op: usize) -> VirtReg {
        self.operands[op].reg
    }
}

impl RegInfo for MockRegs {
    fn reg_operands(&self, reg: VirtReg) -> Vec<OperandId> {
        self.operands
            .iter()
            .enumerate()
            .filter(|(_, o)| o.reg == reg)
            .map(|(i, _)| OperandId::new(i))
            .collect()
    }

    fn reg_operands_no_debug(&self, reg: VirtReg) -> Vec<OperandId> {
        self.operands
            .iter()
            .enumerate()
            .filter(|(_, o)| o.reg == reg && !o.debug)
            .map(|(i, _)| OperandId::new(i))
            .collect()
    }

    fn operand_inst(&self, op: OperandId) -> Inst {
        self.operands[op.index()].inst
    }

    fn operand_sub_reg(&self, op: OperandId) -> Option<SubRegIndex> {
        self.operands[op.index()].sub_reg
    }

    fn operand_is_def(&self, op: OperandId) -> bool {
        self.operands[op.index()].is_def
    }

    fn operand_reads_reg(&self, op: OperandId) -> bool {
        self.operands[op.index()].reads
    }

    fn operand_is_early_clobber(&self, op: OperandId) -> bool {
        self.operands[op.index()].early_clobber
    }

    fn operand_is_undef(&self, op: OperandId) -> bool {
        self.operands[op.index()].undef
    }

    fn operand_is_dead(&self, op: OperandId) -> bool {
        self.operands[op.index()].dead
    }

    fn operand_is_debug(&self, op: OperandId) -> bool {
        self.operands[op.index()].debug
    }

    fn set_operand_reg(&mut self, op: OperandId, reg: VirtReg) {
        self.operands[op.index()].reg = reg;
    }

    fn set_operand_undef(&mut self, op: OperandId) {
        self.operands[op.index()].undef = true;
    }

    fn set_operand_dead(&mut self, op: OperandId) {
        self.operands[op.index()].dead = true;
    }

    fn lane_mask_for_subreg(&self, sub: SubRegIndex) -> LaneBitmask {
        LaneBitmask::from_bits(self.subreg_masks[sub.index()])
    }

    fn create_virtual_register(&mut self, _class: RegClass) -> VirtReg {
        let reg = VirtReg::new(self.next_vreg);
        self.next_vreg += 1;
        reg
    }

    fn reg_class(&self, _reg: VirtReg) -> RegClass {
        RegClass::new(0)
    }

    fn max_lane_mask(&self, _reg: VirtReg) -> LaneBitmask {
        LaneBitmask::from_bits(self.max_mask)
    }

    fn insert_implicit_def(&mut self, pred: Block, reg: VirtReg) -> SlotIndex {
        let inst = self.implicit_def_insts[pred.index()].expect("no implicit def point planned");
        let slot = r(inst);
        self.inserted_implicit_defs.push((pred, reg, slot));
        slot
    }
}

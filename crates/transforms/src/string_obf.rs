/// String literal encryption (`string-obf`).
///
/// Rewrites private constant string globals into XOR-encrypted shadows that
/// are decrypted at run time through `__obf_decrypt`, so the plaintext never
/// appears in the output image. Each instruction use of an eligible global is
/// replaced by a fresh gep + decrypt call at the use site; the plaintext
/// global is erased once its use list is empty.
use crate::Transform;
use murk_core::builder::Builder;
use murk_core::ir::{Const, GlobalVar, Linkage, Operand, Site, Ty, UseSite};
use murk_core::Module;
use murk_utils::config::STRING_OBF_SALT;
use murk_utils::errors::TransformError;
use murk_utils::prng::XorShift32;
use murk_utils::reporter::{Reporter, NUM_STRINGS_ENCRYPTED, TOTAL_STRING_BYTES};
use std::collections::HashMap;
use tracing::debug;

pub const DECRYPT_FN: &str = "__obf_decrypt";

pub struct StringObf;

impl Transform for StringObf {
    fn name(&self) -> &'static str {
        "string-obf"
    }

    fn seed_salt(&self) -> u32 {
        STRING_OBF_SALT
    }

    fn apply(
        &self,
        module: &mut Module,
        rng: &mut XorShift32,
        reporter: &mut Reporter,
    ) -> Result<bool, TransformError> {
        module.get_or_declare(DECRYPT_FN, &[Ty::Ptr, Ty::I32, Ty::I32], Ty::Ptr)?;

        // Snapshot: the pass creates new globals, a live iterator would be
        // invalidated. Keys are drawn in global order, keeping output
        // deterministic under a fixed seed.
        let snapshot: Vec<_> = module
            .globals()
            .filter_map(|(id, g)| eligible_string(g).map(|bytes| (id, g.name.clone(), bytes)))
            .collect();

        let mut encrypted = 0u64;
        let mut total_bytes = 0u64;
        for (gid, name, plain) in snapshot {
            let key = rng.next();
            let kb = (key & 0xFF) as u8;
            // Ciphertext excludes the terminating NUL; the decryptor appends
            // one to the buffer it returns.
            let enc: Vec<u8> = plain[..plain.len() - 1].iter().map(|&b| b ^ kb).collect();
            let len = enc.len();

            let mut enc_name = format!("{name}.enc");
            let mut n = 1;
            while module.global_by_name(&enc_name).is_some() {
                enc_name = format!("{name}.enc.{n}");
                n += 1;
            }
            let enc_gid = module.add_global(GlobalVar {
                name: enc_name,
                ty: Ty::Array(len as u32),
                linkage: Linkage::Private,
                constant: true,
                unnamed_addr: true,
                init: Some(Const::Bytes(enc)),
            });

            // Rewrite use sites bottom-up per block so pending indices stay
            // valid while new instructions are inserted.
            let mut by_func: HashMap<usize, Vec<UseSite>> = HashMap::new();
            for (fi, site) in module.global_uses(gid) {
                by_func.entry(fi).or_default().push(site);
            }
            for (fi, mut sites) in by_func {
                sites.sort_by_key(|s| {
                    let pos = match s.site {
                        Site::Term => usize::MAX,
                        Site::Inst(i) => i,
                    };
                    (s.block, pos)
                });
                let f = &mut module.funcs[fi];
                for site in sites.into_iter().rev() {
                    match site.site {
                        Site::Inst(i) => {
                            let iid = f.block(site.block).insts[i];
                            // Phi operands cannot be rewritten in place; such
                            // uses keep the original global alive.
                            if f.inst(iid).kind.is_phi() {
                                continue;
                            }
                            let call = {
                                let mut b = Builder::before(f, site.block, i);
                                let gep = b.gep("dec_ptr", Operand::Global(enc_gid));
                                b.call(
                                    "dec_str",
                                    DECRYPT_FN,
                                    Ty::Ptr,
                                    vec![
                                        (Ty::Ptr, Operand::Value(gep)),
                                        (Ty::I32, Operand::i32(len as i64)),
                                        (Ty::I32, Operand::i32(key as i32 as i64)),
                                    ],
                                )
                            };
                            let Some(call) = call else { continue };
                            f.replace_operand_at(
                                UseSite {
                                    block: site.block,
                                    site: Site::Inst(i + 2),
                                },
                                &Operand::Global(gid),
                                &Operand::Value(call),
                            );
                        }
                        Site::Term => {
                            let call = {
                                let mut b = Builder::at_end(f, site.block);
                                let gep = b.gep("dec_ptr", Operand::Global(enc_gid));
                                b.call(
                                    "dec_str",
                                    DECRYPT_FN,
                                    Ty::Ptr,
                                    vec![
                                        (Ty::Ptr, Operand::Value(gep)),
                                        (Ty::I32, Operand::i32(len as i64)),
                                        (Ty::I32, Operand::i32(key as i32 as i64)),
                                    ],
                                )
                            };
                            let Some(call) = call else { continue };
                            f.replace_operand_at(
                                site,
                                &Operand::Global(gid),
                                &Operand::Value(call),
                            );
                        }
                    }
                }
            }

            if module.global_uses(gid).is_empty() {
                module.erase_global(gid);
            }
            encrypted += 1;
            total_bytes += len as u64;
        }

        reporter.bump(NUM_STRINGS_ENCRYPTED, encrypted);
        reporter.bump(TOTAL_STRING_BYTES, total_bytes);
        if encrypted > 0 {
            debug!("encrypted {encrypted} strings ({total_bytes} bytes)");
        }
        Ok(encrypted > 0)
    }
}

/// A global is an encryptable string when it is a private constant byte array
/// whose initializer reads as a NUL-terminated string longer than the bare
/// terminator. Shadow globals from an earlier cycle are never re-encrypted:
/// their payload drops the terminator, and their `.enc` suffix is a second
/// guard for the rare ciphertext that ends in a zero byte.
fn eligible_string(g: &GlobalVar) -> Option<Vec<u8>> {
    if !g.constant || g.linkage != Linkage::Private || g.name.ends_with(".enc") {
        return None;
    }
    match &g.init {
        Some(Const::Bytes(b)) if b.len() > 1 && b.last() == Some(&0) => Some(b.clone()),
        _ => None,
    }
}

//! 弱 RSA 模数检测（ROCA）
//!
//! 受影响的模数在一组小素数上的剩余都落在 65537 生成的子群里。
//! 对每个素数预先算出该子群，再对模数做成员测试；全部命中即判定受影响。

use std::sync::OnceLock;

/// The 17 primes whose residues fingerprint the flawed generator.
const PRIMES: [u32; 17] = [
    11, 13, 17, 19, 37, 53, 61, 71, 73, 79, 97, 103, 107, 109, 127, 151, 157,
];

const GENERATOR: u64 = 65537;

fn residue_tables() -> &'static Vec<(u32, Vec<bool>)> {
    static TABLES: OnceLock<Vec<(u32, Vec<bool>)>> = OnceLock::new();
    TABLES.get_or_init(|| {
        PRIMES
            .iter()
            .map(|&p| {
                let mut member = vec![false; p as usize];
                let mut x = 1u64;
                loop {
                    member[x as usize] = true;
                    x = (x * GENERATOR) % p as u64;
                    if x == 1 {
                        break;
                    }
                }
                (p, member)
            })
            .collect()
    })
}

/// 大端字节串对小模数取余
fn mod_small(bytes: &[u8], p: u32) -> u32 {
    let mut acc: u64 = 0;
    for &b in bytes {
        acc = ((acc << 8) | b as u64) % p as u64;
    }
    acc as u32
}

/// 判断 RSA 模数（大端无符号字节串）是否受 ROCA 影响
pub fn is_affected(modulus_be: &[u8]) -> bool {
    for (p, member) in residue_tables() {
        let r = mod_small(modulus_be, *p);
        if !member[r as usize] {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    // 构造一个在所有素数上剩余为 1 的模数（1 总在子群内）即可触发判定
    #[test]
    fn test_all_one_residues_are_affected() {
        // modulus = product of all primes + 1  =>  modulus % p == 1 for every p
        let mut product: u128 = 1;
        for p in PRIMES {
            product *= p as u128;
        }
        let modulus = product + 1;
        let bytes = modulus.to_be_bytes();
        assert!(is_affected(&bytes));
    }

    #[test]
    fn test_healthy_modulus_not_affected() {
        // product of the primes itself has residue 0 everywhere, and 0 is
        // never in a multiplicative subgroup
        let mut product: u128 = 1;
        for p in PRIMES {
            product *= p as u128;
        }
        let bytes = product.to_be_bytes();
        assert!(!is_affected(&bytes));
    }

    #[test]
    fn test_subgroup_membership() {
        // 65537^k mod 11 cycles through a strict subgroup of (Z/11)*
        let tables = residue_tables();
        let (p, member) = &tables[0];
        assert_eq!(*p, 11);
        let members: Vec<usize> = member
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.then_some(i))
            .collect();
        assert!(members.contains(&1));
        assert!(members.len() < 10);
    }
}

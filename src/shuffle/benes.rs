//! Beneš permutation network.
//!
//! A network on `w = 2^m` wires realises any permutation with `w·m − w/2` two-input switches.
//! Permutations use the gather convention `out[i] = in[perm[i]]`.
//!
//! Switches are numbered recursively: the input column, the upper subnetwork, the lower
//! subnetwork, the output column. [route] emits control bits in that order and [traverse]
//! visits switches in the same order, so the two sides of the oblivious switching protocol
//! agree on the numbering without ever exchanging it.

/// Number of switches of the network on `width` wires.
pub fn switch_count(width: usize) -> usize {
    match width {
        0 | 1 => 0,
        2 => 1,
        w => w + 2 * switch_count(w / 2),
    }
}

/// `out[i] = data[perm[i]]`.
pub fn apply_permutation<T: Copy>(perm: &[usize], data: &[T]) -> Vec<T> {
    perm.iter().map(|&i| data[i]).collect()
}

/// Control bits realising `perm`, whose length must be 0, 1 or a power of two.
pub fn route(perm: &[usize]) -> Vec<bool> {
    debug_assert!(perm.len() < 2 || perm.len().is_power_of_two());

    let mut bits = Vec::with_capacity(switch_count(perm.len()));
    route_into(perm, &mut bits);
    bits
}

fn route_into(perm: &[usize], bits: &mut Vec<bool>) {
    let w = perm.len();
    if w < 2 {
        return;
    }
    if w == 2 {
        bits.push(perm[0] == 1);
        return;
    }

    let half = w / 2;
    let mut inv = vec![0usize; w];
    for (o, &s) in perm.iter().enumerate() {
        inv[s] = o;
    }

    // true = crossed
    let mut in_sw: Vec<Option<bool>> = vec![None; half];
    let mut out_sw: Vec<Option<bool>> = vec![None; half];

    // looping algorithm: every cycle starts with output 2k fed by the upper subnetwork
    for start in 0..half {
        if out_sw[start].is_some() {
            continue;
        }
        out_sw[start] = Some(false);

        let mut out = 2 * start;
        loop {
            let src = perm[out];
            in_sw[src / 2] = Some(src % 2 == 1);

            let lower_out = inv[src ^ 1];
            out_sw[lower_out / 2] = Some(lower_out % 2 == 0);

            out = lower_out ^ 1;
            if out == 2 * start {
                break;
            }
        }
    }

    let mut upper = vec![0usize; half];
    let mut lower = vec![0usize; half];
    for k in 0..half {
        let (up_out, low_out) = if out_sw[k].unwrap_or(false) {
            (2 * k + 1, 2 * k)
        } else {
            (2 * k, 2 * k + 1)
        };
        upper[k] = perm[up_out] / 2;
        lower[k] = perm[low_out] / 2;
    }

    bits.extend(in_sw.iter().map(|s| s.unwrap_or(false)));
    route_into(&upper, bits);
    route_into(&lower, bits);
    bits.extend(out_sw.iter().map(|s| s.unwrap_or(false)));
}

/// Visits every switch in routing order, handing `f` the two wires it connects.
///
/// `f` decides what a switch does; a plain conditional swap driven by [route] evaluates the
/// permutation.
pub fn traverse<T, F>(data: &mut [T], f: &mut F)
where
    T: Copy,
    F: FnMut(&mut T, &mut T),
{
    let w = data.len();
    if w < 2 {
        return;
    }
    if w == 2 {
        let (x, y) = data.split_at_mut(1);
        f(&mut x[0], &mut y[0]);
        return;
    }

    let half = w / 2;
    for pair in data.chunks_exact_mut(2) {
        let (x, y) = pair.split_at_mut(1);
        f(&mut x[0], &mut y[0]);
    }

    let mut upper = data.iter().step_by(2).copied().collect::<Vec<_>>();
    let mut lower = data.iter().skip(1).step_by(2).copied().collect::<Vec<_>>();
    traverse(&mut upper, f);
    traverse(&mut lower, f);

    for k in 0..half {
        data[2 * k] = upper[k];
        data[2 * k + 1] = lower[k];
    }

    for pair in data.chunks_exact_mut(2) {
        let (x, y) = pair.split_at_mut(1);
        f(&mut x[0], &mut y[0]);
    }
}

/// Evaluates the network in the clear.
pub fn permute_with_bits<T: Copy>(data: &mut [T], bits: &[bool]) {
    let mut bits = bits.iter();
    traverse(data, &mut |x: &mut T, y: &mut T| {
        if bits.next().copied().unwrap_or(false) {
            std::mem::swap(x, y);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use scuttlebutt::AesRng;

    #[test]
    fn test_switch_count() {
        assert_eq!(switch_count(0), 0);
        assert_eq!(switch_count(2), 1);
        assert_eq!(switch_count(4), 6);
        assert_eq!(switch_count(8), 20);
        // w log w - w/2
        assert_eq!(switch_count(1 << 10), (1 << 10) * 10 - (1 << 9));
    }

    #[test]
    fn test_route_random_permutations() {
        let mut rng = AesRng::new();
        for m in 0..=9 {
            let w = 1usize << m;
            for _ in 0..5 {
                let mut perm = (0..w).collect::<Vec<_>>();
                perm.shuffle(&mut rng);

                let bits = route(&perm);
                assert_eq!(bits.len(), switch_count(w));

                let data = (0..w as u64).map(|x| x * 3 + 1).collect::<Vec<_>>();
                let mut routed = data.clone();
                permute_with_bits(&mut routed, &bits);

                assert_eq!(routed, apply_permutation(&perm, &data), "w={}", w);
            }
        }
    }

    #[test]
    fn test_identity_and_reversal() {
        let w = 16;
        let identity = (0..w).collect::<Vec<_>>();
        let reversal = (0..w).rev().collect::<Vec<_>>();

        for perm in [identity, reversal] {
            let mut data = (0..w as u32).collect::<Vec<_>>();
            permute_with_bits(&mut data, &route(&perm));
            assert_eq!(data.iter().map(|&x| x as usize).collect::<Vec<_>>(), perm);
        }
    }

    #[test]
    fn test_traverse_visits_each_switch_once() {
        let mut data = vec![0u8; 32];
        let mut visits = 0;
        traverse(&mut data, &mut |_: &mut u8, _: &mut u8| visits += 1);
        assert_eq!(visits, switch_count(32));
    }
}

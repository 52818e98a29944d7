//! End-to-end scenarios on the in-process three-party cluster

use spdz_runtime::{
    algebra::{Bit, Ring64, Share},
    error::EngineError,
    processor::SkewMode,
    test_helpers::{run_solo, run_three_party},
};

/// Three parties trivially share a constant, open it through the MAC-checked
/// path, and finish with a clean final verification
#[test]
fn test_open_constant_all_parties() {
    let results = run_three_party("open-constant", |party, proc| {
        let alpha = proc.alpha_share();
        let share = Share::from_clear(Ring64(42), party as u64, alpha);
        proc.registers_mut().write_sp(0, share).unwrap();

        proc.popen_start(&[0], 1).unwrap();
        proc.popen_stop(&[0], 1).unwrap();

        proc.ext_verify_final().unwrap();
        proc.registers().read_cp(0).unwrap()
    });

    assert_eq!(results, vec![Ring64(42); 3]);
}

/// Adding a public constant to a shared value opens to the shifted value and
/// still passes the MAC reconciliation
#[test]
fn test_affine_add_public_constant() {
    let results = run_three_party("affine-add", |party, proc| {
        let alpha = proc.alpha_share();
        let share = Share::from_clear(Ring64(42), party as u64, alpha);
        let shifted = share.add_public(Ring64(58), alpha, party as u64);
        proc.registers_mut().write_sp(0, shifted).unwrap();

        proc.popen_start(&[0], 1).unwrap();
        proc.popen_stop(&[0], 1).unwrap();

        proc.registers().read_cp(0).unwrap()
    });

    assert_eq!(results, vec![Ring64(100); 3]);
}

/// A single ring share of 5 decomposes into the bit triple (1, 0, 1),
/// least significant first
#[test]
fn test_skew_bit_decomposition() {
    let results = run_three_party("skew-decomp", |_party, proc| {
        // Party 0's integer stream opens with 5
        proc.ext_input_share_int(&[0], 1, 0).unwrap();
        proc.skew_bit_decomp(SkewMode::RingToBits, &[0, 1, 2], &[0], 1).unwrap();

        proc.bpopen_start(&[0, 1, 2], 1).unwrap();
        proc.bpopen_stop(&[0, 1, 2], 1).unwrap();

        (0..3).map(|i| proc.registers().read_c2(i).unwrap()).collect::<Vec<_>>()
    });

    for bits in results {
        assert_eq!(bits, vec![Bit(true), Bit(false), Bit(true)]);
    }
}

/// Bits recompose into the ring value they decomposed from
#[test]
fn test_skew_ring_composition_round_trip() {
    let results = run_three_party("skew-comp", |_party, proc| {
        proc.ext_input_share_int(&[0], 1, 0).unwrap();
        proc.skew_bit_decomp(SkewMode::RingToBits, &[0, 1, 2], &[0], 1).unwrap();
        proc.skew_ring_comp(&[4], &[0, 1, 2], 1).unwrap();

        proc.popen_start(&[4], 1).unwrap();
        proc.popen_stop(&[4], 1).unwrap();

        proc.registers().read_cp(4).unwrap()
    });

    assert_eq!(results, vec![Ring64(5); 3]);
}

/// Shared 5 and 7 multiply to 35 through the backend batch, and the
/// telemetry counters tick once per completed batch
#[test]
fn test_batched_multiply_and_open() {
    let results = run_three_party("mult", |_party, proc| {
        // Party 0's integer stream opens with 5, 7
        proc.ext_input_share_int(&[0, 1], 1, 0).unwrap();

        proc.ext_mult_start(&[0, 1], 1).unwrap();
        proc.ext_mult_stop(&[2], 1).unwrap();

        proc.ext_open_start(&[2], 1).unwrap();
        proc.ext_open_stop(&[3], 1).unwrap();

        assert_eq!(proc.rounds(), 2);
        assert_eq!(proc.sent(), 2);
        assert_eq!(proc.ext_verify_optional_suggest().unwrap(), 0);
        proc.registers().read_cp(3).unwrap()
    });

    assert_eq!(results, vec![Ring64(35); 3]);
}

/// The binary bank multiplies through its own context: 1 * 0 = 0
#[test]
fn test_binary_multiply() {
    let results = run_three_party("binary-mult", |_party, proc| {
        // Party 0's bit stream opens with 1, 0
        proc.binput_share_int(&[0, 1], 1, 0).unwrap();

        proc.bext_mult_start(&[0, 1], 1).unwrap();
        proc.bext_mult_stop(&[2], 1).unwrap();

        proc.bpopen_start(&[2], 1).unwrap();
        proc.bpopen_stop(&[2], 1).unwrap();

        proc.registers().read_c2(2).unwrap()
    });

    assert_eq!(results, vec![Bit(false); 3]);
}

/// A multiply batch with an odd operand count is rejected with the typed
/// fatal error
#[test]
fn test_odd_multiply_batch_rejected() {
    run_solo("odd-mult", |proc| {
        match proc.ext_mult_start(&[0, 1, 2], 1) {
            Err(EngineError::OddOperandCount { count }) => assert_eq!(count, 3),
            other => panic!("expected OddOperandCount, got {other:?}"),
        }
    });
}

/// Stops without starts and double starts violate the batch state machine
#[test]
fn test_batch_state_machine_misuse() {
    run_solo("fsm", |proc| {
        assert!(proc.popen_stop(&[0], 1).is_err());

        proc.popen_start(&[0], 1).unwrap();
        assert!(proc.popen_start(&[0], 1).is_err());
        assert!(proc.ext_mult_start(&[0, 1], 1).is_err());
        proc.popen_stop(&[0], 1).unwrap();

        // The binary context is sequenced independently
        proc.bpopen_start(&[0], 1).unwrap();
        proc.popen_start(&[0], 1).unwrap();
        proc.popen_stop(&[0], 1).unwrap();
        proc.bpopen_stop(&[0], 1).unwrap();
    });
}

/// Scenario: two shares persist to the transactions file and read back, the
/// position register tracking offset, end of file and missing file
#[test]
fn test_persistence_round_trip() {
    run_solo("persistence", |proc| {
        let alpha = proc.alpha_share();
        let first = Share::from_clear(Ring64(11), 0, alpha);
        let second = Share::from_clear(Ring64(22), 0, alpha);

        // No file yet: the position register takes the missing-file sentinel
        proc.read_shares_from_file(0, 0, &[4]).unwrap();
        assert_eq!(proc.registers().read_ci(0).unwrap(), -2);

        proc.registers_mut().write_sp(0, first).unwrap();
        proc.registers_mut().write_sp(1, second).unwrap();
        proc.write_shares_to_file(&[0, 1]).unwrap();

        proc.read_shares_from_file(0, 0, &[2, 3]).unwrap();
        assert_eq!(proc.registers().read_sp(2).unwrap(), first);
        assert_eq!(proc.registers().read_sp(3).unwrap(), second);

        // Two Ring64 shares of two components each
        let end = proc.registers().read_ci(0).unwrap();
        assert_eq!(end, 32);

        proc.read_shares_from_file(end, 0, &[4]).unwrap();
        assert_eq!(proc.registers().read_ci(0).unwrap(), -1);
    });
}

/// Clear inputs land in the input party's clear register and leave the other
/// parties at zero
#[test]
fn test_clear_input_is_local() {
    let results = run_three_party("clear-input", |_party, proc| {
        proc.ext_input_clear_int(0, 1).unwrap();
        proc.registers().read_cp(0).unwrap()
    });

    assert_eq!(results, vec![Ring64(0), Ring64(5), Ring64(0)]);
}

/// Integer outputs reveal through the backend and agree across parties
#[test]
fn test_integer_output() {
    let results = run_three_party("int-output", |_party, proc| {
        proc.ext_input_share_int(&[0, 1], 1, 2).unwrap();
        proc.ext_make_integer_output(&[0, 1], 1).unwrap()
    });

    assert_eq!(results, vec![vec![5, 7]; 3]);
}

/// Fixed-point inputs truncate to their integer part on sharing and reveal
/// back out as decimal strings
#[test]
fn test_fixed_input_and_output() {
    let results = run_three_party("fixed-io", |_party, proc| {
        // Party 1's fixes stream opens with 1.5
        proc.ext_input_share_fix(0, 1).unwrap();

        proc.popen_start(&[0], 1).unwrap();
        proc.popen_stop(&[0], 1).unwrap();
        assert_eq!(proc.registers().read_cp(0).unwrap(), Ring64(1));

        proc.ext_make_fixed_output(&[0], 1).unwrap()
    });

    assert_eq!(results, vec![vec!["1".to_string()]; 3]);
}

/// A single shared bit lifts into an arithmetic ring share
#[test]
fn test_skew_bits_to_ring() {
    let results = run_three_party("skew-b2r", |_party, proc| {
        // Party 0's bit stream opens with 1
        proc.binput_share_int(&[0], 1, 0).unwrap();
        proc.skew_bit_decomp(SkewMode::BitsToRing, &[5], &[0], 1).unwrap();

        proc.popen_start(&[5], 1).unwrap();
        proc.popen_stop(&[5], 1).unwrap();

        proc.registers().read_cp(5).unwrap()
    });

    assert_eq!(results, vec![Ring64(1); 3]);
}

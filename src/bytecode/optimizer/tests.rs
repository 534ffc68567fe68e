//! Tests for bytecode optimization.

#[cfg(test)]
#[allow(clippy::module_inception)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use crate::bytecode::instruction::{CompareOperand, CompareTypeAndValuePair as Pair, InstructionKind};
    use crate::bytecode::matcher::input_units;
    use crate::bytecode::opcodes::{CharClass, CharRange, OpCodeId};
    use crate::bytecode::optimizer::{
        block_starting_at, has_overlap, split_basic_blocks, AlternationStrategy, BasicBlock, OptimizationPass,
        OptimizeError, Optimizer, OptimizerObserver, OverlapContext, PatternFlags,
    };
    use crate::bytecode::{ByteCode, Matcher};
    use crate::config::OptimizerConfig;
    use crate::unicode::{BasicUnicodeProperties, Property, UnknownUnicodeProperties};

    /// Greedy `c*`: `L0: ForkStay L2; c; Jump L0; L2:`
    fn star(code: &mut ByteCode, c: char) {
        let fork = code.emit_fork_stay(0);
        code.emit_compare(&[Pair::char(c)]);
        let back = code.emit_jump(0);
        code.patch_jump(back, fork);
        code.patch_jump_to_end(fork);
    }

    /// Greedy `c+`: `L0: c; ForkJump L0`
    fn plus(code: &mut ByteCode, c: char) {
        let start = code.len();
        code.emit_compare(&[Pair::char(c)]);
        let fork = code.emit_fork_jump(0);
        code.patch_jump(fork, start);
    }

    fn literal(text: &str) -> ByteCode {
        let mut code = ByteCode::new();
        code.emit_literal(text);
        code
    }

    fn find(code: &ByteCode, text: &str) -> Option<(usize, usize)> {
        Matcher::new(code)
            .find(&input_units(text, false))
            .unwrap()
            .map(|m| (m.start, m.end))
    }

    fn ctx(case_insensitive: bool) -> OverlapContext<'static> {
        static UNKNOWN: UnknownUnicodeProperties = UnknownUnicodeProperties;
        OverlapContext {
            unicode: &UNKNOWN,
            case_insensitive,
        }
    }

    // ========================================================================
    // Substring detection
    // ========================================================================

    #[test]
    fn test_literal_becomes_substring_search() {
        let mut code = literal("abc");
        let mut optimizer = Optimizer::default();
        let data = optimizer.optimize(&mut code, PatternFlags::default()).unwrap();

        assert_eq!(data.pure_substring_search, Some(b"abc".to_vec()));
        assert!(optimizer.stats().substring_detected);
        assert_eq!(code, literal("abc"));
    }

    #[test]
    fn test_empty_program_is_empty_substring() {
        let mut code = ByteCode::new();
        let data = Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap();
        assert_eq!(data.pure_substring_search, Some(Vec::new()));
    }

    #[test]
    fn test_alternation_is_not_a_substring() {
        let mut code = ByteCode::new();
        code.append_alternation(
            vec![literal("a"), literal("b")],
            AlternationStrategy::Chain,
            PatternFlags::default(),
        );
        let data = Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap();
        assert_eq!(data.pure_substring_search, None);
    }

    #[test]
    fn test_multi_char_compare_is_not_a_substring() {
        let mut code = ByteCode::new();
        code.emit_compare(&[Pair::char('a'), Pair::char('b')]);
        let data = Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap();
        assert_eq!(data.pure_substring_search, None);
        assert_eq!(
            data.starting_ranges,
            vec![CharRange::new('a' as u32, 'b' as u32)]
        );
    }

    #[test]
    fn test_case_insensitive_literal_is_not_a_substring() {
        let mut code = literal("abc");
        let flags = PatternFlags {
            case_insensitive: true,
            ..PatternFlags::default()
        };
        let data = Optimizer::default().optimize(&mut code, flags).unwrap();
        assert_eq!(data.pure_substring_search, None);
    }

    #[test]
    fn test_substring_bytes_follow_unicode_flag() {
        let unicode = PatternFlags {
            unicode: true,
            ..PatternFlags::default()
        };
        let data = Optimizer::default()
            .optimize(&mut literal("é"), unicode)
            .unwrap();
        assert_eq!(data.pure_substring_search, Some("é".as_bytes().to_vec()));

        let mut code = ByteCode::new();
        code.emit_compare(&[Pair::code_point(0xe9)]);
        let data = Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap();
        assert_eq!(data.pure_substring_search, Some(vec![0xe9]));
    }

    // ========================================================================
    // Overlap analysis
    // ========================================================================

    #[test]
    fn test_overlap_of_ranges() {
        let lower = [Pair::range('a', 'z')];
        assert!(has_overlap(&lower, &[Pair::char('x')], ctx(false)));
        assert!(!has_overlap(&lower, &[Pair::char('0')], ctx(false)));
        assert!(!has_overlap(&lower, &[Pair::char('X')], ctx(false)));
        assert!(has_overlap(&lower, &[Pair::char('X')], ctx(true)));
    }

    #[test]
    fn test_overlap_with_negation() {
        let not_a = [Pair::inverse(), Pair::char('a')];
        assert!(has_overlap(&not_a, &[Pair::char('b')], ctx(false)));
        assert!(has_overlap(&[Pair::char('b')], &not_a, ctx(false)));
        assert!(!has_overlap(&[Pair::char('a')], &not_a, ctx(false)));
    }

    #[test]
    fn test_overlap_with_classes() {
        let digit = [Pair::class(CharClass::Digit)];
        assert!(has_overlap(&digit, &[Pair::char('7')], ctx(false)));
        assert!(!has_overlap(&digit, &[Pair::char('x')], ctx(false)));
        assert!(!has_overlap(&digit, &[Pair::class(CharClass::Alpha)], ctx(false)));
        assert!(has_overlap(&digit, &[Pair::class(CharClass::Word)], ctx(false)));
    }

    #[test]
    fn test_overlap_is_conservative_for_unknown_properties() {
        let alphabetic = [Pair::property(Property::ALPHABETIC)];
        assert!(has_overlap(&alphabetic, &[Pair::char('x')], ctx(false)));
        assert!(has_overlap(&[Pair::any_char()], &[Pair::char('x')], ctx(false)));
        assert!(has_overlap(&[Pair::reference(1)], &[Pair::char('x')], ctx(false)));
    }

    #[test]
    fn test_overlap_consults_property_oracle() {
        static BASIC: BasicUnicodeProperties = BasicUnicodeProperties;
        let ctx = OverlapContext {
            unicode: &BASIC,
            case_insensitive: false,
        };
        let alphabetic = [Pair::property(Property::ALPHABETIC)];
        assert!(has_overlap(&alphabetic, &[Pair::char('x')], ctx));
        assert!(!has_overlap(&alphabetic, &[Pair::char('7')], ctx));
    }

    // ========================================================================
    // Atomic rewrite
    // ========================================================================

    #[test]
    fn test_star_before_disjoint_char_becomes_atomic() {
        let mut code = ByteCode::new();
        star(&mut code, 'a');
        code.emit_literal("b");
        let original = code.clone();

        let mut optimizer = Optimizer::default();
        optimizer.optimize(&mut code, PatternFlags::default()).unwrap();

        assert_eq!(code.decode(0).unwrap().opcode(), OpCodeId::ForkReplaceStay);
        assert_eq!(optimizer.stats().loops_rewritten, 1);
        assert_eq!(code.len(), original.len());
        for text in ["b", "aaab", "xaab", "aaa", ""] {
            assert_eq!(find(&code, text), find(&original, text), "{text:?}");
        }
    }

    #[test]
    fn test_star_before_overlapping_char_is_kept() {
        let mut code = ByteCode::new();
        star(&mut code, 'a');
        code.emit_literal("a");

        let mut optimizer = Optimizer::default();
        optimizer.optimize(&mut code, PatternFlags::default()).unwrap();

        assert_eq!(code.decode(0).unwrap().opcode(), OpCodeId::ForkStay);
        assert_eq!(optimizer.stats().loops_rewritten, 0);
        assert_eq!(optimizer.stats().atomic_candidates_rejected, 1);
        assert_eq!(find(&code, "aaa"), Some((0, 3)));
    }

    #[test]
    fn test_plus_at_end_becomes_atomic() {
        let mut code = ByteCode::new();
        plus(&mut code, 'a');
        let original = code.clone();

        Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap();

        let fork = code.iter().last().unwrap();
        assert_eq!(fork.opcode(), OpCodeId::ForkReplaceJump);
        assert_eq!(find(&code, "baaa"), find(&original, "baaa"));
    }

    #[test]
    fn test_case_insensitive_overlap_blocks_rewrite() {
        let mut code = ByteCode::new();
        star(&mut code, 'a');
        code.emit_literal("A");
        let flags = PatternFlags {
            case_insensitive: true,
            ..PatternFlags::default()
        };
        Optimizer::default().optimize(&mut code, flags).unwrap();
        assert_eq!(code.decode(0).unwrap().opcode(), OpCodeId::ForkStay);
    }

    #[test]
    fn test_checkpointed_loop_rewrites_fork_form() {
        // (?:ab)+c
        let mut code = ByteCode::new();
        code.emit_checkpoint(0);
        code.emit_literal("ab");
        let back = code.emit_jump_non_empty(0, 0, OpCodeId::ForkJump);
        code.patch_jump(back, 0);
        code.emit_literal("c");
        let original = code.clone();

        let mut optimizer = Optimizer::default();
        optimizer.optimize(&mut code, PatternFlags::default()).unwrap();

        assert_eq!(optimizer.stats().loops_rewritten, 1);
        assert_eq!(code.get(back), Some(OpCodeId::JumpNonEmpty.to_value()));
        assert_eq!(code.get(back + 3), Some(OpCodeId::ForkReplaceJump.to_value()));
        match code.decode(back).unwrap().kind {
            InstructionKind::JumpNonEmpty { form, checkpoint, .. } => {
                assert_eq!(form, OpCodeId::ForkReplaceJump);
                assert_eq!(checkpoint, 0);
            }
            other => panic!("expected JumpNonEmpty, got {other:?}"),
        }
        assert_eq!(code.len(), original.len());
        for text in ["ababc", "abc", "abab", "c", "xabababc"] {
            assert_eq!(find(&code, text), find(&original, text), "{text:?}");
        }
    }

    #[test]
    fn test_single_atomic_rewrite_policy() {
        let build = || {
            let mut code = ByteCode::new();
            star(&mut code, 'a');
            code.emit_literal("x");
            star(&mut code, 'b');
            code.emit_literal("y");
            code
        };

        let mut all = build();
        let mut optimizer = Optimizer::default();
        optimizer.optimize(&mut all, PatternFlags::default()).unwrap();
        assert_eq!(optimizer.stats().loops_rewritten, 2);

        let mut one = build();
        let config = OptimizerConfig {
            single_atomic_rewrite: true,
            ..OptimizerConfig::default()
        };
        let mut optimizer = Optimizer::new(config);
        optimizer.optimize(&mut one, PatternFlags::default()).unwrap();
        assert_eq!(optimizer.stats().loops_rewritten, 1);
        assert_eq!(one.decode(0).unwrap().opcode(), OpCodeId::ForkReplaceStay);
    }

    #[test]
    fn test_loop_followed_by_anchor_at_end_is_kept() {
        let mut code = ByteCode::new();
        plus(&mut code, 'a');
        code.emit_check_begin();
        Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap();
        assert_eq!(code.iter().nth(1).unwrap().opcode(), OpCodeId::ForkJump);
    }

    // ========================================================================
    // Alternation compilation
    // ========================================================================

    #[test]
    fn test_alternation_trie_shares_prefixes() {
        let mut code = ByteCode::new();
        let stats = code.append_alternation(
            vec![literal("cat"), literal("car"), literal("cow")],
            AlternationStrategy::Trie,
            PatternFlags::default(),
        );

        assert!(stats.used_trie, "{stats:?}");
        assert!(stats.shared_nodes >= 2);
        assert_eq!(stats.trie_rejected, None);
        code.validate().unwrap();

        assert_eq!(find(&code, "a cow"), Some((2, 5)));
        assert_eq!(find(&code, "car"), Some((0, 3)));
        assert_eq!(find(&code, "cat"), Some((0, 3)));
        assert_eq!(find(&code, "ca"), None);
    }

    #[test]
    fn test_trie_is_laid_out_breadth_first() {
        let mut code = ByteCode::new();
        let stats = code.append_alternation(
            vec![literal("abx"), literal("aby"), literal("c"), literal("d")],
            AlternationStrategy::Trie,
            PatternFlags::default(),
        );
        assert!(stats.used_trie, "{stats:?}");
        code.validate().unwrap();

        // The root's last child follows inline, then the queued branches in order
        let order: String = code
            .iter()
            .filter_map(|instruction| instruction.compare_args())
            .flat_map(|args| args.flat_compares())
            .filter_map(|pair| char::from_u32(pair.value as u32))
            .collect();
        assert_eq!(order, "dabycx");

        for (text, expected) in [("abx", Some((0, 3))), ("aby", Some((0, 3))), ("zc", Some((1, 2))), ("abz", None)] {
            assert_eq!(find(&code, text), expected, "{text:?}");
        }
    }

    #[test]
    fn test_alternation_chain_strategy() {
        let mut code = ByteCode::new();
        let stats = code.append_alternation(
            vec![literal("cat"), literal("car")],
            AlternationStrategy::Chain,
            PatternFlags::default(),
        );
        assert!(!stats.used_trie);
        assert_eq!(stats.chain_cost, code.len());
        assert_eq!(find(&code, "xcar"), Some((1, 4)));
    }

    #[test]
    fn test_alternation_without_shared_prefix_uses_chain() {
        let mut code = ByteCode::new();
        let stats = code.append_alternation(
            vec![literal("ab"), literal("cd")],
            AlternationStrategy::Auto,
            PatternFlags::default(),
        );
        assert!(!stats.used_trie);
        assert_eq!(stats.trie_rejected, Some("no shared prefix"));
        assert_eq!(find(&code, "cd"), Some((0, 2)));
    }

    #[test]
    fn test_alternation_keeps_preference_order() {
        // "a|ab" must prefer the shorter alternative
        let mut code = ByteCode::new();
        code.append_alternation(
            vec![literal("a"), literal("ab")],
            AlternationStrategy::Trie,
            PatternFlags::default(),
        );
        assert_eq!(find(&code, "ab"), Some((0, 1)));
    }

    #[test]
    fn test_single_alternative() {
        let mut code = ByteCode::new();
        let stats = code.append_alternation(
            vec![literal("abc")],
            AlternationStrategy::Auto,
            PatternFlags::default(),
        );
        assert!(!stats.used_trie);
        assert_eq!(code, literal("abc"));
    }

    // ========================================================================
    // Character classes
    // ========================================================================

    #[test]
    fn test_class_compiles_to_lookup_table() {
        let mut code = ByteCode::new();
        code.append_character_class(&[
            Pair::range('a', 'z'),
            Pair::range('0', '9'),
            Pair::char('_'),
        ]);
        code.validate().unwrap();

        let instruction = code.decode(0).unwrap();
        let InstructionKind::Compare(args) = instruction.kind else {
            panic!("expected a compare, got {}", instruction.opcode());
        };
        assert_eq!(args.count(), 1);
        let Some(CompareOperand::LookupTable { sensitive, .. }) = args.operands().next() else {
            panic!("expected a lookup table");
        };
        let ranges: Vec<CharRange> = sensitive.iter().map(|&packed| CharRange::unpack(packed)).collect();
        assert_eq!(
            ranges,
            vec![
                CharRange::new('0' as u32, '9' as u32),
                CharRange::single('_' as u32),
                CharRange::new('a' as u32, 'z' as u32),
            ]
        );

        for (text, expected) in [("q", true), ("5", true), ("_", true), ("-", false), ("Q", false)] {
            assert_eq!(find(&code, text).is_some(), expected, "{text:?}");
        }
    }

    #[test]
    fn test_inverted_class() {
        let mut code = ByteCode::new();
        code.append_character_class(&[Pair::inverse(), Pair::range('a', 'z'), Pair::char('_')]);
        code.validate().unwrap();
        assert_eq!(find(&code, "q"), None);
        assert_eq!(find(&code, "_"), None);
        assert_eq!(find(&code, "qQ"), Some((1, 2)));
    }

    #[test]
    fn test_class_merges_adjacent_ranges() {
        let mut code = ByteCode::new();
        code.append_character_class(&[Pair::range('a', 'm'), Pair::range('n', 'z'), Pair::char('b')]);
        let args = code.decode(0).unwrap().compare_args().unwrap();
        let Some(CompareOperand::LookupTable { sensitive, .. }) = args.operands().next() else {
            panic!("expected a lookup table");
        };
        assert_eq!(sensitive, &[CharRange::new('a' as u32, 'z' as u32).pack()]);
    }

    // ========================================================================
    // Jump threading and block splitting
    // ========================================================================

    #[test]
    fn test_useless_jumps_are_removed() {
        let mut code = ByteCode::new();
        code.emit_literal("a");
        code.emit_jump(0);
        code.emit_fork_jump(0);
        code.emit_literal("b");

        let mut optimizer = Optimizer::default();
        let data = optimizer.optimize(&mut code, PatternFlags::default()).unwrap();

        assert_eq!(optimizer.stats().useless_jumps_removed, 2);
        assert_eq!(optimizer.stats().units_removed, 4);
        assert_eq!(code, literal("ab"));
        assert_eq!(data.pure_substring_search, Some(b"ab".to_vec()));
    }

    #[test]
    fn test_threading_keeps_targets_valid() {
        // (a|b)* with a useless jump inside the loop body
        let mut code = ByteCode::new();
        let fork = code.emit_fork_stay(0);
        code.emit_jump(0);
        code.append_alternation(
            vec![literal("a"), literal("b")],
            AlternationStrategy::Chain,
            PatternFlags::default(),
        );
        let back = code.emit_jump(0);
        code.patch_jump(back, fork);
        code.patch_jump_to_end(fork);
        code.emit_literal("c");
        let original = code.clone();

        let config = OptimizerConfig {
            enable_atomic_rewrite: false,
            ..OptimizerConfig::default()
        };
        Optimizer::new(config)
            .optimize(&mut code, PatternFlags::default())
            .unwrap();

        code.validate().unwrap();
        assert_eq!(code.len(), original.len() - 2);
        for text in ["c", "abbac", "xbc", "ab"] {
            assert_eq!(find(&code, text), find(&original, text), "{text:?}");
        }
    }

    #[test]
    fn test_blocks_partition_the_program() {
        let mut code = ByteCode::new();
        star(&mut code, 'a');
        code.append_alternation(
            vec![literal("xy"), literal("z")],
            AlternationStrategy::Chain,
            PatternFlags::default(),
        );
        plus(&mut code, 'b');

        let blocks = split_basic_blocks(&code);
        assert_eq!(blocks.first().map(|b| b.start), Some(0));
        assert_eq!(blocks.last().map(|b| b.end), Some(code.len()));
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(!pair[0].is_empty());
        }

        // Every jump target starts a block
        for instruction in code.iter() {
            if let Some(target) = instruction.jump_target() {
                let target = target as usize;
                assert!(target == code.len() || blocks.iter().any(|b| b.start == target));
            }
        }
    }

    #[test]
    fn test_threading_renumbers_repeat() {
        // x(a){3}b with a useless jump at the end of the repeated body
        let mut code = literal("x");
        let body = code.len();
        code.emit_literal("a");
        code.emit_jump(0);
        let repeat = code.len();
        code.emit_repeat(repeat - body, 3, 0);
        code.emit_literal("b");
        let original = code.clone();

        let mut optimizer = Optimizer::default();
        optimizer.optimize(&mut code, PatternFlags::default()).unwrap();

        assert_eq!(optimizer.stats().useless_jumps_removed, 1);
        let repeat = repeat - 2;
        let instruction = code.decode(repeat).unwrap();
        assert!(matches!(instruction.kind, InstructionKind::Repeat { count: 3, .. }));
        assert_eq!(instruction.jump_target(), Some(body as isize));

        let blocks = split_basic_blocks(&code);
        assert!(block_starting_at(&blocks, body).is_some());
        assert!(block_starting_at(&blocks, instruction.end()).is_some());

        for text in ["xaaab", "xaab", "xaaaab", "zxaaabz"] {
            assert_eq!(find(&code, text), find(&original, text), "{text:?}");
        }
        assert_eq!(find(&code, "zxaaabz"), Some((1, 6)));
    }

    #[test]
    fn test_split_empty_program() {
        assert_eq!(split_basic_blocks(&ByteCode::new()), Vec::<BasicBlock>::new());
    }

    // ========================================================================
    // Starting ranges
    // ========================================================================

    #[test]
    fn test_starting_ranges_skip_captures_and_anchor() {
        let mut code = ByteCode::new();
        code.emit_save_left_capture_group(1);
        code.emit_check_begin();
        code.emit_compare(&[Pair::range('A', 'C')]);
        star(&mut code, 'x');

        let data = Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap();
        assert!(data.only_start_of_line);
        assert_eq!(data.starting_ranges, vec![CharRange::new('A' as u32, 'C' as u32)]);
        assert_eq!(
            data.starting_ranges_insensitive,
            vec![
                CharRange::new('A' as u32, 'C' as u32),
                CharRange::new('a' as u32, 'c' as u32),
            ]
        );
    }

    #[test]
    fn test_no_starting_ranges_for_classes() {
        let mut code = ByteCode::new();
        code.emit_compare(&[Pair::class(CharClass::Digit)]);
        star(&mut code, 'x');
        let data = Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap();
        assert!(data.starting_ranges.is_empty());
        assert!(!data.only_start_of_line);
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    #[test]
    fn test_optimize_is_idempotent() {
        let mut code = ByteCode::new();
        code.emit_jump(0);
        star(&mut code, 'a');
        code.emit_literal("b");
        plus(&mut code, 'c');

        let mut optimizer = Optimizer::default();
        let first = optimizer.optimize(&mut code, PatternFlags::default()).unwrap();
        let once = code.clone();
        let second = optimizer.optimize(&mut code, PatternFlags::default()).unwrap();

        assert_eq!(code, once);
        assert_eq!(first, second);
    }

    #[test]
    fn test_disabled_config_leaves_program_alone() {
        let mut code = ByteCode::new();
        code.emit_jump(0);
        star(&mut code, 'a');
        code.emit_literal("b");
        let original = code.clone();

        let mut optimizer = Optimizer::new(OptimizerConfig::disabled());
        let data = optimizer.optimize(&mut code, PatternFlags::default()).unwrap();

        assert_eq!(code, original);
        assert_eq!(data, Default::default());
        assert_eq!(optimizer.stats().total_optimizations(), 0);
    }

    #[test]
    fn test_malformed_bytecode_is_rejected_untouched() {
        let mut code = ByteCode::new();
        code.emit_literal("a");
        code.emit_jump(100);
        let original = code.clone();

        let err = Optimizer::default()
            .optimize(&mut code, PatternFlags::default())
            .unwrap_err();

        let OptimizeError::MalformedBytecode { ip, .. } = &err;
        assert_eq!(*ip, 5);
        assert!(err.to_string().contains("Malformed bytecode"));
        assert_eq!(code, original);
    }

    #[test]
    fn test_stats_accumulate_across_programs() {
        let mut optimizer = Optimizer::default();
        for text in ["ab", "cd"] {
            let mut code = literal(text);
            optimizer.optimize(&mut code, PatternFlags::default()).unwrap();
        }
        assert_eq!(optimizer.stats().blocks_found, 2);
        assert!(optimizer.stats().substring_detected);
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl OptimizerObserver for RecordingObserver {
        fn pass_started(&self, pass: OptimizationPass) {
            self.push(format!("start {pass}"));
        }

        fn pass_finished(&self, pass: OptimizationPass, changed: bool) {
            self.push(format!("finish {pass} {changed}"));
        }

        fn rewrite_applied(&self, pass: OptimizationPass, ip: usize, _detail: &str) {
            self.push(format!("rewrite {pass} {ip}"));
        }

        fn blocks_split(&self, blocks: &[BasicBlock]) {
            self.push(format!("blocks {}", blocks.len()));
        }
    }

    #[test]
    fn test_observer_sees_every_pass() {
        let mut code = ByteCode::new();
        star(&mut code, 'a');
        code.emit_literal("b");

        let observer = RecordingObserver::default();
        Optimizer::default()
            .with_observer(&observer)
            .optimize(&mut code, PatternFlags::default())
            .unwrap();

        let events = observer.events.into_inner().unwrap();
        assert_eq!(
            events,
            vec![
                "start jump-threading",
                "finish jump-threading false",
                "start block-splitting",
                "blocks 3",
                "finish block-splitting false",
                "start substring-search",
                "finish substring-search false",
                "start atomic-rewrite",
                "rewrite atomic-rewrite 0",
                "finish atomic-rewrite true",
                "start starting-ranges",
                "finish starting-ranges false",
            ]
        );
    }

    #[test]
    fn test_observer_stops_after_substring() {
        let observer = RecordingObserver::default();
        Optimizer::default()
            .with_observer(&observer)
            .optimize(&mut literal("ab"), PatternFlags::default())
            .unwrap();

        let events = observer.events.into_inner().unwrap();
        assert_eq!(events.last().map(String::as_str), Some("finish substring-search true"));
        assert!(!events.iter().any(|e| e.contains("atomic")));
    }
}

//! 结果模型的性质测试。
//!
//! # 教案级导览
//!
//! - **Why**：`join`、`then` 的短路与阻塞获取都建立在记录转换之上，任何偏差都会在组合后被放大；
//! - **How**：用 proptest 生成任意值与任意失败掩码，检查转换的代数性质；
//! - **What**：提升后还原得到原值；含失败时返回最左侧错误；硬失败覆盖每个槽位。

use proptest::prelude::*;
use spark_future::{CapturedError, Expected, Future, Promise, Record};

fn slot<T>(value: T, failed: bool, error: &CapturedError) -> Expected<T> {
    if failed {
        Err(error.clone())
    } else {
        Ok(value)
    }
}

proptest! {
    #[test]
    fn completion_roundtrip_preserves_values(a in any::<i64>(), b in ".*", c in any::<bool>()) {
        let record = (a, b.clone(), c);
        let restored = <(i64, String, bool)>::from_completion(record.clone().into_completion());
        prop_assert_eq!(restored.ok(), Some(record));
    }

    #[test]
    fn leftmost_error_is_reported(mask in 1_u8..8, a in any::<u16>(), b in any::<u16>(), c in any::<u16>()) {
        let errors = [
            CapturedError::msg("slot0"),
            CapturedError::msg("slot1"),
            CapturedError::msg("slot2"),
        ];
        let completion = (
            slot(a, mask & 0b001 != 0, &errors[0]),
            slot(b, mask & 0b010 != 0, &errors[1]),
            slot(c, mask & 0b100 != 0, &errors[2]),
        );
        let leftmost = mask.trailing_zeros() as usize;
        let error = <(u16, u16, u16)>::from_completion(completion)
            .expect_err("掩码非零时必有错误");
        prop_assert!(error.ptr_eq(&errors[leftmost]));
    }

    #[test]
    fn then_expect_sees_exactly_what_finish_delivered(mask in 0_u8..4, a in any::<u32>(), b in any::<u32>()) {
        let error = CapturedError::msg("masked");
        let mut promise = Promise::<(u32, u32)>::new();
        let observed = promise.get_future().then_expect(
            |x: Expected<u32>, y: Expected<u32>| (x.ok(), y.ok()),
        );
        promise.finish((
            slot(a, mask & 0b01 != 0, &error),
            slot(b, mask & 0b10 != 0, &error),
        ));
        let expected = (
            (mask & 0b01 == 0).then_some(a),
            (mask & 0b10 == 0).then_some(b),
        );
        prop_assert_eq!(observed.get().ok(), Some(expected));
    }

    #[test]
    fn ready_futures_chain_like_plain_functions(seed in any::<i32>()) {
        let chained = Future::ready((seed,))
            .then(|v: i32| v.wrapping_mul(3))
            .then(|v: i32| v.wrapping_sub(7));
        prop_assert_eq!(chained.get().ok(), Some(seed.wrapping_mul(3).wrapping_sub(7)));
    }
}

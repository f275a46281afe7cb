//! 元数适配：让回调以“逐个参数”的形式接收记录中的各个字段。
//!
//! `Future<(i32, String)>` 的 `then` 回调写作 `|n: i32, s: String| ..`，而不是接收一个元组。
//! 这里的 [`Apply`] / [`ApplyMut`] 为 0 到 6 个参数的闭包提供统一的调用入口。
//!
//! 由于签名推导无法穿透本 trait，闭包参数需要显式标注类型。

/// 以元组参数调用一次性闭包。
pub trait Apply<Args> {
    /// 闭包的返回值。
    type Output;

    /// 展开 `args` 并调用。
    fn apply(self, args: Args) -> Self::Output;
}

/// 以元组参数重复调用闭包，供流式 `for_each` 使用。
pub trait ApplyMut<Args> {
    /// 闭包的返回值。
    type Output;

    /// 展开 `args` 并调用。
    fn apply_mut(&mut self, args: Args) -> Self::Output;
}

macro_rules! impl_apply {
    ($($ty:ident $var:ident),*) => {
        impl<Func, Out, $($ty),*> Apply<($($ty,)*)> for Func
        where
            Func: FnOnce($($ty),*) -> Out,
        {
            type Output = Out;

            fn apply(self, args: ($($ty,)*)) -> Out {
                let ($($var,)*) = args;
                self($($var),*)
            }
        }

        impl<Func, Out, $($ty),*> ApplyMut<($($ty,)*)> for Func
        where
            Func: FnMut($($ty),*) -> Out,
        {
            type Output = Out;

            fn apply_mut(&mut self, args: ($($ty,)*)) -> Out {
                let ($($var,)*) = args;
                self($($var),*)
            }
        }
    };
}

impl_apply!();
impl_apply!(A a);
impl_apply!(A a, B b);
impl_apply!(A a, B b, C c);
impl_apply!(A a, B b, C c, D d);
impl_apply!(A a, B b, C c, D d, E e);
impl_apply!(A a, B b, C c, D d, E e, F f);

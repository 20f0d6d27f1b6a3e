use std::rc::Rc;

use crate::Signal;

/// Two-way accessor: a getter and a setter over state owned elsewhere.
pub struct Binding<T> {
    get: Rc<dyn Fn() -> T>,
    set: Rc<dyn Fn(T)>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

impl<T: 'static> Binding<T> {
    pub fn new(get: impl Fn() -> T + 'static, set: impl Fn(T) + 'static) -> Self {
        Self {
            get: Rc::new(get),
            set: Rc::new(set),
        }
    }

    pub fn from_signal(signal: &Signal<T>) -> Self
    where
        T: Clone,
    {
        let read = signal.clone();
        let write = signal.clone();
        Self::new(move || read.get(), move |v| write.set(v))
    }

    pub fn get(&self) -> T {
        (self.get)()
    }

    pub fn set(&self, value: T) {
        (self.set)(value)
    }

    /// Binding to one part of `T`. Writing it reads the whole value, patches
    /// the part and writes the whole value back through `self`.
    pub fn field<F: 'static>(
        &self,
        get: impl Fn(&T) -> F + 'static,
        set: impl Fn(&mut T, F) + 'static,
    ) -> Binding<F> {
        let read = self.clone();
        let write = self.clone();
        Binding::new(
            move || get(&read.get()),
            move |f| {
                let mut whole = write.get();
                set(&mut whole, f);
                write.set(whole);
            },
        )
    }
}
